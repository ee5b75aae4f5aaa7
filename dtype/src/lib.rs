//! Element types and canonical shapes for tardy.
//!
//! [`DType`] is the element-type enumeration of the IR. Host frameworks speak
//! their own dialect ([`canonical::HostDType`]); the [`canonical`] module
//! converts between the two and owns the [`canonical::CanonicalShape`] that
//! every IR node carries.

pub mod canonical;
pub mod cast;
pub mod device;
pub mod error;
pub mod ext;
pub mod policy;

#[cfg(any(test, feature = "proptest"))]
pub mod proptest_gen;


pub use canonical::{CanonicalShape, Dims, DynamicFlags, HostDType, HostShape, canonicalize, checked_numel, to_host};
pub use device::{DeviceKind, DeviceSpec};
pub use error::{Error, Result};
pub use ext::HasDType;
pub use policy::StoragePolicy;

/// IR element types.
///
/// The discriminant order doubles as promotion priority: lower is more
/// specific (see [`DType::least_upper_dtype`]).
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[enumset(repr = "u32")]
pub enum DType {
    /// One-bit logical predicate.
    Bool = 0,

    // Interleaved signed/unsigned for correct LUB priority
    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,

    Float16 = 9,
    BFloat16 = 10,
    Float32 = 11,
    Float64 = 12,
}

impl DType {
    /// Storage size of one element in bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
            Self::Int64 | Self::UInt64 => 8,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Width in bits of the value range (a predicate is one bit).
    pub const fn bits(&self) -> u32 {
        match self {
            Self::Bool => 1,
            _ => self.bytes() as u32 * 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Short IR spelling used by the graph text dump (`f32`, `s64`, `pred`).
    pub const fn short_name(&self) -> &'static str {
        match self {
            Self::Bool => "pred",
            Self::Int8 => "s8",
            Self::Int16 => "s16",
            Self::Int32 => "s32",
            Self::Int64 => "s64",
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::UInt32 => "u32",
            Self::UInt64 => "u64",
            Self::Float16 => "f16",
            Self::BFloat16 => "bf16",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
        }
    }

    /// Stable one-byte tag, used when serializing shapes for fingerprints.
    pub const fn tag(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}
