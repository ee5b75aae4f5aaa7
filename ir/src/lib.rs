//! Intermediate representation for tardy's lazy tensors.
//!
//! Tensor operations are recorded as immutable, hash-consed [`Node`]s by a
//! per-device [`GraphBuilder`]. At a synchronization point the graph reachable
//! from the live roots is captured ([`CapturedGraph`]) and fingerprinted
//! ([`fingerprint()`]) together with the active [`Precision`] mode.
//!
//! # Module Organization
//!
//! - [`types`] - Constant values and operator sub-kinds
//! - [`op`] - Operator kinds with their static attributes
//! - [`node`] - Nodes and graph traversal
//! - [`builder`] - Recording, validation, hash consing, live roots
//! - [`shape`] - Result-shape inference
//! - [`graph`] - Captured subgraphs
//! - [`fingerprint`] - SHA-256 graph hashes
//! - [`precision`] - Precision modes and the process-wide controller
//! - [`print`] - Text dumps

pub mod builder;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod node;
pub mod op;
pub mod precision;
pub mod print;
pub mod shape;
pub mod types;

#[cfg(test)]
pub mod test;

pub use builder::{GraphBuilder, LiveRoot};
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, fingerprint};
pub use graph::CapturedGraph;
pub use node::{Node, NodeRef, toposort};
pub use op::{Axes, Op};
pub use precision::{Precision, PrecisionController};
pub use types::{BinaryOp, CompareOp, ConstValue, ReduceOp, UnaryOp};

pub use tardy_dtype::{CanonicalShape, DType, DeviceSpec};
