use serde::{Deserialize, Serialize};

/// Enumerates the scalar element types the scheduler can lay out.
///
/// Every variant has a well-defined byte size; sub-byte element types are not
/// representable in this IR, so byte footprints are always computable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I1,
    Si8,
    Ui8,
    Si16,
    Ui16,
    Si32,
    Ui32,
    Si64,
    Ui64,
    Bf16,
    F16,
    F32,
    F64,
}

impl DType {
    /// Returns `true` when the dtype is any signed or unsigned integer.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Si8
                | DType::Ui8
                | DType::Si16
                | DType::Ui16
                | DType::Si32
                | DType::Ui32
                | DType::Si64
                | DType::Ui64
        )
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::Bf16 | DType::F16 | DType::F32 | DType::F64)
    }

    /// Returns the storage size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 | DType::Si8 | DType::Ui8 => 1,
            DType::Si16 | DType::Ui16 | DType::Bf16 | DType::F16 => 2,
            DType::Si32 | DType::Ui32 | DType::F32 => 4,
            DType::Si64 | DType::Ui64 | DType::F64 => 8,
        }
    }
}
