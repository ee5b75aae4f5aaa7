use crate::DType;

/// How element types are laid out in device memory.
///
/// Some accelerators store a few wide types in a narrower or wider native
/// format. The logical dtype of a tensor never changes; only its storage does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StoragePolicy {
    /// Every dtype stored as itself.
    #[default]
    Native,
    /// `f64 -> f32`, `s16 -> s32`, `u16 -> u32`.
    Reduced,
}

impl StoragePolicy {
    /// Element type actually held by device memory for a logical `dtype`.
    pub const fn storage_dtype(self, dtype: DType) -> DType {
        match (self, dtype) {
            (Self::Reduced, DType::Float64) => DType::Float32,
            (Self::Reduced, DType::Int16) => DType::Int32,
            (Self::Reduced, DType::UInt16) => DType::UInt32,
            (_, dtype) => dtype,
        }
    }

    /// Whether values of `dtype` survive storage unchanged.
    pub const fn is_lossless(self, dtype: DType) -> bool {
        !matches!((self, dtype), (Self::Reduced, DType::Float64))
    }
}
