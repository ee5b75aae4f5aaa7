use snafu::Snafu;
use tardy_dtype::{CanonicalShape, DType};

use crate::buffer::Failure;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Invalid device specification.
    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },

    /// Literal data does not cover the shape.
    #[snafu(display("literal of shape {shape} needs {expected} elements, got {actual}"))]
    LiteralLength { shape: CanonicalShape, expected: usize, actual: usize },

    /// Literal data variant does not match the dtype.
    #[snafu(display("{dtype} elements cannot be stored as {class} data"))]
    DataClassMismatch { dtype: DType, class: &'static str },

    /// Host element type differs from the literal dtype.
    #[snafu(display("cannot read {actual} data as {requested}"))]
    ElementTypeMismatch { requested: DType, actual: DType },

    /// Reshape must preserve the element count.
    #[snafu(display("reshape size mismatch: input size {input_size} != output size {output_size}"))]
    ReshapeSizeMismatch { input_size: usize, output_size: usize },

    /// Row index outside the leading axis.
    #[snafu(display("row {index} is out of range for shape {shape}"))]
    RowOutOfRange { index: usize, shape: CanonicalShape },

    /// Stacked literals must share one shape.
    #[snafu(display("cannot stack {actual} onto {expected}"))]
    StackShapeMismatch { expected: CanonicalShape, actual: CanonicalShape },

    #[snafu(display("cannot stack zero literals"))]
    EmptyStack,

    /// The buffer was failed by its producer. Display is the original cause.
    #[snafu(display("{source}"))]
    Failed { source: Failure },

    /// Waiting for a buffer or signal took too long.
    #[snafu(display("timed out after {waited_ms}ms waiting for {what}"))]
    Timeout { what: String, waited_ms: u64 },
}
