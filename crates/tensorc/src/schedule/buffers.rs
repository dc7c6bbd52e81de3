//! Scheduler-owned buffer entities: logical buffers with lifetimes and alias
//! parents, the physical buffers they fold into, and the materialised
//! per-connector allocation records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::{Coord, DType, OutputRef, Shape};

/// Stable identifier of a logical buffer inside one scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u32);

/// Stable identifier of a physical buffer inside one scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhysicalId(pub u32);

/// Named memory region a buffer is placed in, each governed by its own
/// allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryLocation {
    /// Externally-owned model inputs.
    Input,
    /// Buffers surfaced as graph outputs.
    Output,
    /// Read-only constants.
    Rdata,
    /// General scratch.
    Data,
}

impl MemoryLocation {
    pub const ALL: [MemoryLocation; 4] = [
        MemoryLocation::Input,
        MemoryLocation::Output,
        MemoryLocation::Rdata,
        MemoryLocation::Data,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MemoryLocation::Input => "input",
            MemoryLocation::Output => "output",
            MemoryLocation::Rdata => "rdata",
            MemoryLocation::Data => "data",
        }
    }
}

impl fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Liveness interval on the scheduler's integer clock.
///
/// A buffer is live over the half-open span `[birth, end())`; `used_count`
/// tracks how many consumers have not yet been visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    pub birth: usize,
    pub age: usize,
    pub used_count: usize,
}

impl Lifetime {
    pub fn is_alive(&self) -> bool {
        self.used_count > 0
    }

    pub fn end(&self) -> usize {
        self.birth + self.age
    }

    /// Half-open interval intersection.
    pub fn overlaps(&self, other: &Lifetime) -> bool {
        self.birth < other.end() && other.birth < self.end()
    }
}

/// Records that a buffer occupies a sub-rectangle of another buffer,
/// starting at `begin` in the parent's coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferParent {
    pub buffer: BufferId,
    pub begin: Coord,
}

/// One logical buffer per output connector.
#[derive(Debug, Clone)]
pub struct LogicalBuffer {
    pub id: BufferId,
    pub owner: OutputRef,
    pub location: MemoryLocation,
    pub dtype: DType,
    pub shape: Shape,
    pub lifetime: Lifetime,
    /// Alias link; `None` marks an alias root.
    pub parent: Option<BufferParent>,
    /// Bound late by the physical pool stage.
    pub physical: Option<PhysicalId>,
}

impl LogicalBuffer {
    pub fn byte_len(&self) -> Option<usize> {
        self.shape.byte_len(self.dtype)
    }
}

/// Contiguous byte range inside a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpan {
    pub start: usize,
    pub size: usize,
}

impl MemorySpan {
    pub fn end(&self) -> usize {
        self.start + self.size
    }

    pub fn overlaps(&self, other: &MemorySpan) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// The unit of placement handed to a region allocator; one per alias root.
#[derive(Debug, Clone)]
pub struct PhysicalBuffer {
    pub id: PhysicalId,
    /// The alias-root logical buffer whose footprint this is.
    pub owner: BufferId,
    pub allocation: Option<MemorySpan>,
}

/// Concrete byte-level placement of one output connector, the artifact
/// downstream code generation consumes verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferAllocation {
    pub location: MemoryLocation,
    pub dtype: DType,
    /// Byte size of this buffer's own extent.
    pub size: usize,
    pub shape: Shape,
    /// The shape strides are derived from: the alias root's shape for true
    /// sub-buffers, the buffer's own shape otherwise.
    pub parent_shape: Shape,
    /// Row-major element strides of `parent_shape`.
    pub strides: Coord,
    /// Byte offset inside the region.
    pub start: usize,
}

impl BufferAllocation {
    pub fn end(&self) -> usize {
        self.start + self.size
    }
}
