//! Error types for compilation and execution.

use std::path::PathBuf;

use snafu::Snafu;
use tardy_dtype::{CanonicalShape, DType, DeviceSpec};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The compiler rejected a graph.
    #[snafu(display("compilation of graph {fingerprint} failed: {source}"))]
    Compilation { fingerprint: String, source: CompileError },

    /// Inputs handed to a dispatch do not match the artifact signature.
    #[snafu(display("dispatch to {device} rejected: {reason}"))]
    Dispatch { device: DeviceSpec, reason: String },

    /// The device worker is gone.
    #[snafu(display("device queue for {device} is shut down"))]
    QueueClosed { device: DeviceSpec },

    /// A kernel failed while running.
    #[snafu(display("execution of node %{node} ({op}) failed: {source}"))]
    Execution { node: usize, op: &'static str, source: KernelError },

    /// Executable called with the wrong number of inputs.
    #[snafu(display("executable expects {expected} inputs, got {actual}"))]
    InputCount { expected: usize, actual: usize },

    /// Buffer access failed. Display is the underlying cause.
    #[snafu(display("{source}"))]
    Device { source: tardy_device::Error },

    /// A graph dump could not be written.
    #[snafu(display("cannot write graph dump to {}: {source}", path.display()))]
    GraphDump { path: PathBuf, source: std::io::Error },
}

/// Failure inside one reference kernel.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KernelError {
    #[snafu(display("integer division by zero"))]
    DivisionByZero,

    #[snafu(display("{op} has no kernel for {class} data"))]
    NoKernel { op: &'static str, class: &'static str },

    #[snafu(display("{source}"))]
    Literal { source: tardy_device::Error },
}

/// Backend diagnostic for a rejected graph.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
    /// The operation has no kernel for this element type.
    #[snafu(display("node %{node}: {op} is not supported for {dtype}"))]
    UnsupportedOperation { node: usize, op: &'static str, dtype: DType },

    /// Node shape disagrees with what its operands produce.
    #[snafu(display("node %{node}: {op} declares {declared} but operands produce {inferred}"))]
    ShapeMismatch { node: usize, op: &'static str, declared: CanonicalShape, inferred: String },

    /// Operand missing from the captured graph.
    #[snafu(display("node %{node}: {op} references an operand outside the graph"))]
    DanglingOperand { node: usize, op: &'static str },

    /// Graph without outputs.
    #[snafu(display("graph has no outputs"))]
    EmptyGraph,

    /// Free-form backend message.
    #[snafu(display("{message}"))]
    Backend { message: String },
}

impl CompileError {
    /// Offending node position, when the diagnostic names one.
    pub fn node(&self) -> Option<usize> {
        match self {
            Self::UnsupportedOperation { node, .. }
            | Self::ShapeMismatch { node, .. }
            | Self::DanglingOperand { node, .. } => Some(*node),
            Self::EmptyGraph | Self::Backend { .. } => None,
        }
    }
}
