use std::env;
use std::sync::OnceLock;

static TENSORC_SCHED_ALIGN: OnceLock<usize> = OnceLock::new();
static TENSORC_SCHED_VERIFY: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}

/// Byte alignment the reference target hands its allocators.
pub(crate) fn sched_alignment() -> usize {
    *TENSORC_SCHED_ALIGN.get_or_init(|| {
        env::var("TENSORC_SCHED_ALIGN")
            .ok()
            .and_then(|v| parse_usize(&v))
            .filter(|&align| align > 0)
            .unwrap_or(8)
    })
}

/// Whether schedule runs re-check allocator placements by default.
pub(crate) fn verify_allocations_enabled() -> bool {
    *TENSORC_SCHED_VERIFY.get_or_init(|| match env::var("TENSORC_SCHED_VERIFY") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
