//! Conversion between host-framework tensor metadata and canonical IR shapes.
//!
//! A host framework describes a tensor with its own element type
//! ([`HostDType`]), signed dimension sizes, and one "is dynamic" marker per
//! dimension ([`HostShape`]). The IR uses [`CanonicalShape`]: an IR
//! [`DType`], unsigned sizes, and *optional* dynamic flags.
//!
//! # Dynamic flags
//!
//! The flags of a canonical shape are either absent or have exactly one entry
//! per dimension. [`canonicalize`] attaches them only when at least one
//! dimension is dynamic, so a fully static shape carries `None` rather than
//! `Some(vec![false; rank])`. Code that inspects the flags must keep that
//! distinction.
//!
//! # Unsigned 64-bit narrowing
//!
//! The host side has no unsigned 64-bit integer in the IR's value domain:
//! host `u64` canonicalizes to [`DType::Int64`], and a canonical
//! [`DType::UInt64`] maps back to host `i64`. Values above `i64::MAX` wrap
//! when data crosses the boundary (see [`narrow_u64`]). This is the only
//! element type for which the round trip is not exact.

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::DType;
use crate::error::{ElementCountOverflowSnafu, NegativeDimensionSnafu, RankMismatchSnafu, Result, UnsupportedDtypeSnafu};

/// Dimension sizes (stack-allocated for rank <= 4).
pub type Dims = SmallVec<[usize; 4]>;

/// Per-dimension dynamic markers.
pub type DynamicFlags = SmallVec<[bool; 4]>;

/// Element types as the host tensor framework names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumIter, strum::VariantArray, strum::Display)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[strum(serialize_all = "lowercase")]
pub enum HostDType {
    Bool,
    UInt8,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    BFloat16,
    Float32,
    Float64,
    Complex64,
    Complex128,
    QInt8,
    QUInt8,
}

impl HostDType {
    /// Whether the type has a canonical counterpart at all.
    pub const fn is_supported(&self) -> bool {
        !matches!(self, Self::Complex64 | Self::Complex128 | Self::QInt8 | Self::QUInt8)
    }

    /// Whether `to_host(canonicalize(x))` reproduces this type exactly.
    ///
    /// Only `UInt64` narrows.
    pub const fn round_trips(&self) -> bool {
        self.is_supported() && !matches!(self, Self::UInt64)
    }

    /// Canonical element type for this host type.
    pub fn canonical(self) -> Result<DType> {
        let dtype = match self {
            Self::Bool => DType::Bool,
            Self::UInt8 => DType::UInt8,
            Self::Int8 => DType::Int8,
            Self::Int16 => DType::Int16,
            Self::Int32 => DType::Int32,
            Self::Int64 => DType::Int64,
            Self::UInt16 => DType::UInt16,
            Self::UInt32 => DType::UInt32,
            // Narrowing: see module docs.
            Self::UInt64 => DType::Int64,
            Self::Float16 => DType::Float16,
            Self::BFloat16 => DType::BFloat16,
            Self::Float32 => DType::Float32,
            Self::Float64 => DType::Float64,
            Self::Complex64 | Self::Complex128 | Self::QInt8 | Self::QUInt8 => {
                return UnsupportedDtypeSnafu { dtype: self }.fail();
            }
        };
        Ok(dtype)
    }

    /// Host type for a canonical element type.
    pub const fn from_canonical(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Self::Bool,
            DType::Int8 => Self::Int8,
            DType::Int16 => Self::Int16,
            DType::Int32 => Self::Int32,
            DType::Int64 => Self::Int64,
            DType::UInt8 => Self::UInt8,
            DType::UInt16 => Self::UInt16,
            DType::UInt32 => Self::UInt32,
            DType::UInt64 => Self::Int64,
            DType::Float16 => Self::Float16,
            DType::BFloat16 => Self::BFloat16,
            DType::Float32 => Self::Float32,
            DType::Float64 => Self::Float64,
        }
    }
}

/// Narrow a host `u64` value into the canonical signed 64-bit domain.
///
/// Values above `i64::MAX` wrap to negative numbers.
pub const fn narrow_u64(value: u64) -> i64 {
    value as i64
}

/// Tensor metadata as the host framework describes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostShape {
    pub dtype: HostDType,
    pub sizes: Vec<i64>,
    /// One marker per dimension.
    pub dynamic: Vec<bool>,
}

impl HostShape {
    /// Fully static host shape.
    pub fn new(dtype: HostDType, sizes: impl Into<Vec<i64>>) -> Self {
        let sizes = sizes.into();
        let dynamic = vec![false; sizes.len()];
        Self { dtype, sizes, dynamic }
    }

    pub fn with_dynamic(dtype: HostDType, sizes: impl Into<Vec<i64>>, dynamic: impl Into<Vec<bool>>) -> Self {
        Self { dtype, sizes: sizes.into(), dynamic: dynamic.into() }
    }
}

/// Canonical IR shape: element type, sizes, optional dynamic flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalShape {
    dtype: DType,
    dims: Dims,
    dynamic: Option<DynamicFlags>,
}

impl CanonicalShape {
    /// Static shape without dynamic flags.
    pub fn new(dtype: DType, dims: impl IntoIterator<Item = usize>) -> Self {
        Self { dtype, dims: dims.into_iter().collect(), dynamic: None }
    }

    /// Rank-0 shape.
    pub fn scalar(dtype: DType) -> Self {
        Self { dtype, dims: Dims::new(), dynamic: None }
    }

    /// Shape with explicit dynamic flags.
    ///
    /// The flags are kept exactly as given (even when all are `false`); only
    /// [`canonicalize`] drops a flag set with no dynamic entry.
    pub fn with_dynamic(
        dtype: DType,
        dims: impl IntoIterator<Item = usize>,
        flags: impl IntoIterator<Item = bool>,
    ) -> Result<Self> {
        let dims: Dims = dims.into_iter().collect();
        let flags: DynamicFlags = flags.into_iter().collect();
        ensure!(flags.len() == dims.len(), RankMismatchSnafu { rank: dims.len(), markers: flags.len() });
        Ok(Self { dtype, dims, dynamic: Some(flags) })
    }

    /// Shape whose flags follow the canonical rule: kept only when one is set.
    pub fn with_optional_dynamic(
        dtype: DType,
        dims: impl IntoIterator<Item = usize>,
        flags: Option<DynamicFlags>,
    ) -> Result<Self> {
        match flags {
            Some(flags) if flags.iter().any(|&d| d) => Self::with_dynamic(dtype, dims, flags),
            _ => Ok(Self::new(dtype, dims)),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Dynamic flags, `None` when the shape never had any.
    pub fn dynamic(&self) -> Option<&[bool]> {
        self.dynamic.as_deref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.as_ref().is_some_and(|flags| flags.iter().any(|&d| d))
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements, saturating at `usize::MAX`.
    pub fn numel(&self) -> usize {
        self.dims.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim)).unwrap_or(usize::MAX)
    }

    pub fn size_bytes(&self) -> usize {
        self.numel().saturating_mul(self.dtype.bytes())
    }

    /// Same dimensions with another element type.
    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self { dtype, ..self.clone() }
    }

    /// Dimension sizes equal, ignoring dtype and flags.
    pub fn same_dims(&self, other: &Self) -> bool {
        self.dims == other.dims
    }
}

impl std::fmt::Display for CanonicalShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if self.dynamic.as_ref().is_some_and(|flags| flags[i]) {
                f.write_str("<=")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// Element count of `dims` whose byte size in `dtype` fits in `usize`.
pub fn checked_numel(dtype: DType, dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .filter(|numel| numel.checked_mul(dtype.bytes()).is_some())
        .context(ElementCountOverflowSnafu { dims: dims.to_vec() })
}

/// Convert host metadata into a canonical shape.
///
/// # Errors
///
/// - [`crate::Error::UnsupportedDtype`] for complex and quantized types
/// - [`crate::Error::RankMismatch`] when markers and sizes differ in length
/// - [`crate::Error::NegativeDimension`] for negative sizes
/// - [`crate::Error::ElementCountOverflow`] when the byte size overflows
pub fn canonicalize(host: &HostShape) -> Result<CanonicalShape> {
    let dtype = host.dtype.canonical()?;
    ensure!(
        host.dynamic.len() == host.sizes.len(),
        RankMismatchSnafu { rank: host.sizes.len(), markers: host.dynamic.len() }
    );

    let dims = host
        .sizes
        .iter()
        .enumerate()
        .map(|(dim, &size)| {
            ensure!(size >= 0, NegativeDimensionSnafu { dim, size });
            Ok(size as usize)
        })
        .collect::<Result<Dims>>()?;
    checked_numel(dtype, &dims)?;

    let dynamic = host.dynamic.iter().any(|&d| d).then(|| host.dynamic.iter().copied().collect());
    Ok(CanonicalShape { dtype, dims, dynamic })
}

/// Convert a canonical shape back into host metadata.
///
/// Absent dynamic flags become all-`false` markers.
pub fn to_host(shape: &CanonicalShape) -> HostShape {
    let sizes = shape.dims.iter().map(|&d| d as i64).collect();
    let dynamic = match &shape.dynamic {
        Some(flags) => flags.to_vec(),
        None => vec![false; shape.rank()],
    };
    HostShape { dtype: HostDType::from_canonical(shape.dtype), sizes, dynamic }
}
