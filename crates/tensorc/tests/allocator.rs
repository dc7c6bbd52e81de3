use tensorc::allocator::{
    AllocationError, BufferAllocator, FirstFitAllocator, LinearAllocator, PhysicalBufferInfo,
};
use tensorc::schedule::{Lifetime, MemoryLocation, PhysicalId};

fn buffer(id: u32, size: usize, birth: usize, end: usize) -> PhysicalBufferInfo {
    PhysicalBufferInfo {
        id: PhysicalId(id),
        location: MemoryLocation::Data,
        size,
        lifetime: Lifetime {
            birth,
            age: end - birth,
            used_count: 0,
        },
    }
}

fn span_of(allocator: &dyn BufferAllocator, id: u32) -> (usize, usize) {
    let span = allocator.allocations()[&PhysicalId(id)];
    (span.start, span.size)
}

#[test]
fn first_fit_separates_overlapping_lifetimes() {
    let mut allocator = FirstFitAllocator::new(8);
    allocator.mark(&buffer(0, 16, 0, 2)).expect("mark");
    allocator.mark(&buffer(1, 16, 1, 3)).expect("mark");
    allocator.finish();

    assert_eq!(span_of(&allocator, 0), (0, 16));
    assert_eq!(span_of(&allocator, 1), (16, 16));
    assert_eq!(allocator.max_usage(), 32);
}

#[test]
fn first_fit_reuses_bytes_after_a_lifetime_ends() {
    let mut allocator = FirstFitAllocator::new(8);
    allocator.mark(&buffer(0, 16, 0, 2)).expect("mark");
    allocator.mark(&buffer(1, 16, 2, 4)).expect("mark");
    allocator.finish();

    assert_eq!(span_of(&allocator, 0), (0, 16));
    assert_eq!(span_of(&allocator, 1), (0, 16));
    assert_eq!(allocator.max_usage(), 16);
}

#[test]
fn first_fit_fills_the_lowest_free_gap() {
    let mut allocator = FirstFitAllocator::new(8);
    allocator.mark(&buffer(0, 16, 0, 10)).expect("mark");
    allocator.mark(&buffer(1, 16, 0, 2)).expect("mark");
    allocator.mark(&buffer(2, 16, 3, 10)).expect("mark");
    allocator.finish();

    // Buffer 1 is dead by the time buffer 2 is born, so its bytes come back.
    assert_eq!(span_of(&allocator, 2), (16, 16));
    assert_eq!(allocator.max_usage(), 32);
}

#[test]
fn first_fit_aligns_placements() {
    let mut allocator = FirstFitAllocator::new(8);
    allocator.mark(&buffer(0, 10, 0, 4)).expect("mark");
    allocator.mark(&buffer(1, 10, 0, 4)).expect("mark");
    allocator.finish();

    assert_eq!(span_of(&allocator, 0), (0, 10));
    assert_eq!(span_of(&allocator, 1), (16, 10));
}

#[test]
fn first_fit_reports_exhaustion() {
    let mut allocator = FirstFitAllocator::with_capacity(8, 16);
    allocator.mark(&buffer(0, 16, 0, 2)).expect("mark");
    let err = allocator.mark(&buffer(1, 16, 1, 3)).expect_err("exhausted");
    assert_eq!(
        err,
        AllocationError::Exhausted {
            required: 32,
            capacity: 16,
        }
    );
}

#[test]
fn linear_never_reuses_bytes() {
    let mut allocator = LinearAllocator::new(8);
    allocator.mark(&buffer(0, 16, 0, 1)).expect("mark");
    allocator.mark(&buffer(1, 16, 5, 6)).expect("mark");
    allocator.finish();

    assert_eq!(span_of(&allocator, 0), (0, 16));
    assert_eq!(span_of(&allocator, 1), (16, 16));
    assert_eq!(allocator.max_usage(), 32);
}

#[test]
fn linear_aligns_the_cursor_between_marks() {
    let mut allocator = LinearAllocator::new(8);
    allocator.mark(&buffer(0, 10, 0, 1)).expect("mark");
    allocator.mark(&buffer(1, 10, 1, 2)).expect("mark");
    allocator.finish();

    assert_eq!(span_of(&allocator, 1), (16, 10));
    assert_eq!(allocator.max_usage(), 26);
}

#[test]
fn linear_reports_exhaustion() {
    let mut allocator = LinearAllocator::with_capacity(8, 24);
    allocator.mark(&buffer(0, 16, 0, 1)).expect("mark");
    let err = allocator.mark(&buffer(1, 16, 1, 2)).expect_err("exhausted");
    assert_eq!(
        err,
        AllocationError::Exhausted {
            required: 32,
            capacity: 24,
        }
    );
}

#[test]
fn zero_sized_buffers_are_recorded_without_usage() {
    let mut allocator = FirstFitAllocator::new(8);
    allocator.mark(&buffer(0, 0, 0, 1)).expect("mark");
    allocator.finish();

    assert_eq!(span_of(&allocator, 0), (0, 0));
    assert_eq!(allocator.max_usage(), 0);
}
