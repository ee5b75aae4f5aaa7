use snafu::Snafu;
use tardy_device::Failure;
use tardy_dtype::DType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The graph builder rejected an operation.
    #[snafu(display("{source}"))]
    Graph { source: tardy_ir::Error },

    #[snafu(display("{source}"))]
    Runtime { source: tardy_runtime::Error },

    #[snafu(display("{source}"))]
    Device { source: tardy_device::Error },

    #[snafu(display("{source}"))]
    Collective { source: tardy_distributed::Error },

    /// A synchronization failed; the tensors it covered carry the same cause.
    #[snafu(display("{source}"))]
    Failed { source: Failure },

    #[snafu(display("no common dtype for {lhs} and {rhs}"))]
    NoCommonDType { lhs: DType, rhs: DType },

    #[snafu(display("cannot broadcast {lhs:?} with {rhs:?}"))]
    BroadcastIncompatible { lhs: Vec<usize>, rhs: Vec<usize> },

    #[snafu(display("axis {axis} is out of range for tensor with {ndim} dimensions"))]
    AxisOutOfRange { axis: isize, ndim: usize },

    #[snafu(display("invalid permutation: axes {axes:?} is not a permutation of 0..{ndim}"))]
    InvalidPermutation { axes: Vec<isize>, ndim: usize },

    #[snafu(display("multiple -1 dimensions in reshape are not allowed"))]
    MultipleInferDimensions,

    #[snafu(display("negative dimension {dim} is not allowed (except -1 for inference)"))]
    NegativeDimension { dim: isize },

    #[snafu(display("cannot reshape {from:?} to {to:?}"))]
    ReshapeSizeMismatch { from: Vec<usize>, to: Vec<isize> },

    #[snafu(display("matrix multiplication needs rank 1 or 2 operands, got lhs: {lhs_dims}D, rhs: {rhs_dims}D"))]
    DotDimensionError { lhs_dims: usize, rhs_dims: usize },

    /// A synchronization returned without materializing the tensor.
    #[snafu(display("tensor {tensor} was not materialized by synchronization"))]
    NotMaterialized { tensor: u64 },

    /// Device-data node without its buffer attached.
    #[snafu(display("parameter node %{node} has no device buffer"))]
    MissingBuffer { node: u64 },

    /// The scanned tensors have no common non-zero leading length.
    #[snafu(display("scan: {reason}"))]
    ScanLength { reason: String },

    /// The scan body's outputs do not fit the loop.
    #[snafu(display("scan body: {reason}"))]
    ScanBody { reason: String },
}
