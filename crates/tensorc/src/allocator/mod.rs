//! Region allocators: the pluggable placement contract plus the two
//! policies shipped with the crate.
//!
//! An allocator owns one memory region. The scheduler marks physical buffers
//! in ascending birth order; the allocator must give any two buffers whose
//! lifetimes intersect disjoint byte ranges. After `finish()` the allocator
//! is frozen and reports the region's peak usage.

use std::collections::HashMap;

use thiserror::Error;

use crate::schedule::{Lifetime, MemoryLocation, MemorySpan, PhysicalId};

/// Everything an allocator needs to know about one physical buffer.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalBufferInfo {
    pub id: PhysicalId,
    pub location: MemoryLocation,
    pub size: usize,
    pub lifetime: Lifetime,
}

/// Placement failures surfaced by an allocator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("placement needs {required} bytes but region capacity is {capacity}")]
    Exhausted { required: usize, capacity: usize },
}

/// Contract between the scheduler and a region's placement policy.
pub trait BufferAllocator {
    /// Binds `buffer` to a byte range disjoint from every already-marked
    /// buffer whose lifetime intersects it.
    fn mark(&mut self, buffer: &PhysicalBufferInfo) -> Result<(), AllocationError>;

    /// Freezes the allocator; no further `mark` calls are accepted.
    fn finish(&mut self);

    /// Supremum of `start + size` over all marked buffers.
    fn max_usage(&self) -> usize;

    /// The byte range bound to each marked buffer.
    fn allocations(&self) -> &HashMap<PhysicalId, MemorySpan>;
}

/// Per-region allocator mapping, populated by the target for each run.
#[derive(Default)]
pub struct AllocatorBank {
    allocators: HashMap<MemoryLocation, Box<dyn BufferAllocator>>,
}

impl AllocatorBank {
    pub fn new() -> Self {
        AllocatorBank::default()
    }

    /// Installs `allocator` for `location`, replacing any previous one.
    pub fn register(&mut self, location: MemoryLocation, allocator: Box<dyn BufferAllocator>) {
        self.allocators.insert(location, allocator);
    }

    pub fn get(&self, location: MemoryLocation) -> Option<&dyn BufferAllocator> {
        self.allocators.get(&location).map(|boxed| boxed.as_ref())
    }

    pub fn get_mut(&mut self, location: MemoryLocation) -> Option<&mut (dyn BufferAllocator + '_)> {
        match self.allocators.get_mut(&location) {
            Some(boxed) => Some(boxed.as_mut()),
            None => None,
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Lifetime-aware first-fit: places each buffer at the lowest aligned offset
/// that does not overlap any live conflicting span.
///
/// Buffers whose lifetimes are disjoint may share bytes, which is what lets
/// a long chain of equal-sized temporaries run in two slots instead of one
/// per node.
pub struct FirstFitAllocator {
    alignment: usize,
    capacity: Option<usize>,
    marked: Vec<(Lifetime, MemorySpan)>,
    allocations: HashMap<PhysicalId, MemorySpan>,
    max_usage: usize,
    finished: bool,
}

impl FirstFitAllocator {
    pub fn new(alignment: usize) -> Self {
        Self::with_capacity_opt(alignment, None)
    }

    /// First-fit over a bounded region; `mark` fails once the region cannot
    /// hold a placement.
    pub fn with_capacity(alignment: usize, capacity: usize) -> Self {
        Self::with_capacity_opt(alignment, Some(capacity))
    }

    fn with_capacity_opt(alignment: usize, capacity: Option<usize>) -> Self {
        assert!(alignment > 0, "alignment must be positive");
        FirstFitAllocator {
            alignment,
            capacity,
            marked: Vec::new(),
            allocations: HashMap::new(),
            max_usage: 0,
            finished: false,
        }
    }
}

impl BufferAllocator for FirstFitAllocator {
    fn mark(&mut self, buffer: &PhysicalBufferInfo) -> Result<(), AllocationError> {
        debug_assert!(!self.finished, "mark after finish");

        // Spans whose owners are live at the same time as the candidate.
        let mut conflicts: Vec<MemorySpan> = self
            .marked
            .iter()
            .filter(|(lifetime, _)| lifetime.overlaps(&buffer.lifetime))
            .map(|&(_, span)| span)
            .collect();
        conflicts.sort_by_key(|span| span.start);

        let mut start = 0usize;
        for span in conflicts {
            if span.start >= start + buffer.size {
                break;
            }
            start = start.max(align_up(span.end(), self.alignment));
        }

        if let Some(capacity) = self.capacity {
            if start + buffer.size > capacity {
                return Err(AllocationError::Exhausted {
                    required: start + buffer.size,
                    capacity,
                });
            }
        }

        let span = MemorySpan {
            start,
            size: buffer.size,
        };
        self.marked.push((buffer.lifetime, span));
        self.allocations.insert(buffer.id, span);
        self.max_usage = self.max_usage.max(span.end());
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn max_usage(&self) -> usize {
        self.max_usage
    }

    fn allocations(&self) -> &HashMap<PhysicalId, MemorySpan> {
        &self.allocations
    }
}

/// Aligned bump allocation: every buffer gets a fresh range.
///
/// The right policy for regions whose buffers are all simultaneously live —
/// inputs, outputs and constants never free.
pub struct LinearAllocator {
    alignment: usize,
    capacity: Option<usize>,
    cursor: usize,
    allocations: HashMap<PhysicalId, MemorySpan>,
    max_usage: usize,
    finished: bool,
}

impl LinearAllocator {
    pub fn new(alignment: usize) -> Self {
        Self::with_capacity_opt(alignment, None)
    }

    pub fn with_capacity(alignment: usize, capacity: usize) -> Self {
        Self::with_capacity_opt(alignment, Some(capacity))
    }

    fn with_capacity_opt(alignment: usize, capacity: Option<usize>) -> Self {
        assert!(alignment > 0, "alignment must be positive");
        LinearAllocator {
            alignment,
            capacity,
            cursor: 0,
            allocations: HashMap::new(),
            max_usage: 0,
            finished: false,
        }
    }
}

impl BufferAllocator for LinearAllocator {
    fn mark(&mut self, buffer: &PhysicalBufferInfo) -> Result<(), AllocationError> {
        debug_assert!(!self.finished, "mark after finish");

        let start = align_up(self.cursor, self.alignment);
        if let Some(capacity) = self.capacity {
            if start + buffer.size > capacity {
                return Err(AllocationError::Exhausted {
                    required: start + buffer.size,
                    capacity,
                });
            }
        }

        let span = MemorySpan {
            start,
            size: buffer.size,
        };
        self.cursor = span.end();
        self.allocations.insert(buffer.id, span);
        self.max_usage = self.max_usage.max(span.end());
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn max_usage(&self) -> usize {
        self.max_usage
    }

    fn allocations(&self) -> &HashMap<PhysicalId, MemorySpan> {
        &self.allocations
    }
}
