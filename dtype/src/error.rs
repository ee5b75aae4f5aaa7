use snafu::Snafu;

use crate::canonical::HostDType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Host element type has no IR counterpart.
    #[snafu(display("unsupported dtype: {dtype:?} has no canonical representation"))]
    UnsupportedDtype { dtype: HostDType },

    /// Dynamic-dimension markers do not line up with the dimension sizes.
    #[snafu(display("dynamic-dimension markers have length {markers} but the shape has rank {rank}"))]
    RankMismatch { rank: usize, markers: usize },

    /// Host dimension sizes must be non-negative.
    #[snafu(display("dimension {dim} has negative size {size}"))]
    NegativeDimension { dim: usize, size: i64 },

    /// Element count or byte size does not fit in `usize`.
    #[snafu(display("element count of {dims:?} overflows"))]
    ElementCountOverflow { dims: Vec<usize> },
}
