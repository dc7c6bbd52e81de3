use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::ir::DType;

/// Coordinate or stride vector indexed by axis.
pub type Coord = SmallVec<[usize; 4]>;

/// Concrete tensor shape as an ordered list of static extents.
///
/// The scheduler only places buffers whose extents are known, so there is no
/// symbolic-dimension variant here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Coord,
}

impl Shape {
    pub fn new(dims: impl IntoIterator<Item = usize>) -> Self {
        Self {
            dims: dims.into_iter().collect(),
        }
    }

    pub fn scalar() -> Self {
        Self { dims: Coord::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Returns element count unless the product overflows `usize`.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for &dim in self.dims.iter() {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }

    /// Returns total byte length for the given element type, when it fits.
    pub fn byte_len(&self, dtype: DType) -> Option<usize> {
        self.element_count()?.checked_mul(dtype.size_in_bytes())
    }

    /// Row-major strides in elements; the innermost axis has stride one.
    pub fn row_major_strides(&self) -> Coord {
        let rank = self.rank();
        let mut strides: Coord = smallvec![0; rank];
        let mut acc = 1usize;
        for axis in (0..rank).rev() {
            strides[axis] = acc;
            acc *= self.dims[axis];
        }
        strides
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.iter().copied())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims)
    }
}

/// Element offset of a coordinate under the given strides.
///
/// Zips the two operands and stops at the shorter one; rank-changing aliases
/// (a bitcast over a sub-buffer) resolve their offsets through this.
pub fn element_offset(strides: &[usize], begin: &[usize]) -> usize {
    strides
        .iter()
        .zip(begin.iter())
        .map(|(stride, coord)| stride * coord)
        .sum()
}
