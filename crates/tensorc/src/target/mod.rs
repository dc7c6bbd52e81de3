//! Target descriptions: how a device partitions memory into regions and
//! which placement policy governs each.

use crate::allocator::{AllocatorBank, FirstFitAllocator, LinearAllocator};
use crate::env;
use crate::schedule::MemoryLocation;

/// A device description, as far as the scheduler is concerned: the bank of
/// region allocators placement runs against.
pub trait Target {
    /// Populates `bank` with one allocator per memory region the target
    /// supports. Called once per scheduling run.
    fn register_allocators(&self, bank: &mut AllocatorBank);
}

/// The in-tree reference target: first-fit with lifetime sharing for the
/// scratch region, bump allocation for the always-live regions.
pub struct ReferenceTarget {
    alignment: usize,
}

impl ReferenceTarget {
    pub fn new() -> Self {
        ReferenceTarget {
            alignment: env::sched_alignment(),
        }
    }

    pub fn with_alignment(alignment: usize) -> Self {
        assert!(alignment > 0, "alignment must be positive");
        ReferenceTarget { alignment }
    }
}

impl Default for ReferenceTarget {
    fn default() -> Self {
        ReferenceTarget::new()
    }
}

impl Target for ReferenceTarget {
    fn register_allocators(&self, bank: &mut AllocatorBank) {
        bank.register(
            MemoryLocation::Input,
            Box::new(LinearAllocator::new(self.alignment)),
        );
        bank.register(
            MemoryLocation::Output,
            Box::new(LinearAllocator::new(self.alignment)),
        );
        bank.register(
            MemoryLocation::Rdata,
            Box::new(LinearAllocator::new(self.alignment)),
        );
        bank.register(
            MemoryLocation::Data,
            Box::new(FirstFitAllocator::new(self.alignment)),
        );
    }
}
