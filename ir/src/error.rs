use smallvec::SmallVec;
use snafu::Snafu;
use tardy_dtype::{CanonicalShape, DType, DeviceSpec};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Wrong number of operands for an operator kind.
    #[snafu(display("{op} takes {expected} operand(s), got {actual}"))]
    ArityMismatch { op: &'static str, expected: usize, actual: usize },

    /// Operands of an element-wise operation disagree on dtype.
    #[snafu(display("dtype mismatch in {op}: {lhs} vs {rhs}"))]
    DTypeMismatch { op: &'static str, lhs: DType, rhs: DType },

    /// Operands of an element-wise operation disagree on dimensions.
    #[snafu(display("shape mismatch in {op}: {lhs:?} vs {rhs:?}"))]
    ShapeMismatch { op: &'static str, lhs: SmallVec<[usize; 4]>, rhs: SmallVec<[usize; 4]> },

    /// Select condition must be a predicate.
    #[snafu(display("select condition must be pred, got {actual}"))]
    PredicateRequired { actual: DType },

    /// Dot supports rank-1 and rank-2 operands only.
    #[snafu(display("dot expects rank 1 or 2 operands, got ranks {lhs_rank} and {rhs_rank}"))]
    DotRankUnsupported { lhs_rank: usize, rhs_rank: usize },

    /// Contraction dimensions of a dot disagree.
    #[snafu(display("dot contraction mismatch: {lhs} vs {rhs}"))]
    DotContractionMismatch { lhs: usize, rhs: usize },

    /// Reshape must preserve the element count.
    #[snafu(display("reshape size mismatch: input size {input_size} != output size {output_size}"))]
    ReshapeSizeMismatch { input_size: usize, output_size: usize },

    /// Broadcast target is not reachable from the source shape.
    #[snafu(display("cannot broadcast {from:?} to {to:?}"))]
    BroadcastInvalid { from: Vec<usize>, to: Vec<usize> },

    /// Permute has invalid permutation.
    #[snafu(display("invalid permutation {permutation:?}: expected permutation of 0..{expected_dims}"))]
    PermuteInvalidPermutation { permutation: Vec<usize>, expected_dims: usize },

    /// Reduction axis outside the operand rank.
    #[snafu(display("axis {axis} out of range for rank {rank}"))]
    AxisOutOfRange { axis: usize, rank: usize },

    /// Reduction axis listed twice.
    #[snafu(display("axis {axis} listed more than once"))]
    DuplicateAxis { axis: usize },

    /// Leaves are recorded through dedicated constructors.
    #[snafu(display("{op} is a leaf and has no inferable shape"))]
    LeafOperation { op: &'static str },

    /// Caller-requested shape disagrees with inference.
    #[snafu(display("{op}: requested shape {requested} but inferred {inferred}"))]
    ShapeDisagreement { op: &'static str, requested: CanonicalShape, inferred: CanonicalShape },

    /// Operand was recorded on another device's builder.
    #[snafu(display("operand lives on {operand} but the builder records for {builder}"))]
    DeviceMismatch { builder: DeviceSpec, operand: DeviceSpec },

    /// Shape construction failed.
    #[snafu(display("invalid shape: {source}"))]
    Shape { source: tardy_dtype::Error },

    /// Unknown precision mode name.
    #[snafu(display("unknown precision mode '{value}' (expected default, high or highest)"))]
    UnknownPrecision { value: String },
}
