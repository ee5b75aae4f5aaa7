use super::*;

/// Rust element types with a fixed IR dtype.
pub trait HasDType: Copy + Send + Sync + 'static {
    const DTYPE: DType;
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl HasDType for $ty { const DTYPE: DType = $dtype; })*
    };
}

impl_dtype_ext! {
    bool => DType::Bool,
    i8 => DType::Int8, i16 => DType::Int16, i32 => DType::Int32, i64 => DType::Int64,
    u8 => DType::UInt8, u16 => DType::UInt16, u32 => DType::UInt32, u64 => DType::UInt64,
    half::f16 => DType::Float16, half::bf16 => DType::BFloat16,
    f32 => DType::Float32, f64 => DType::Float64,
}
