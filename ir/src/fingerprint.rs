//! Stable content hashes of captured graphs.
//!
//! The fingerprint is SHA-256 over a canonical byte serialization of the
//! graph plus the precision mode. It depends only on structure:
//!
//! - node ids and buffer ids never enter the hash; operands are referenced by
//!   their position in the post-order, device-data leaves by parameter number
//! - constants contribute their value bits
//! - every shape contributes dtype, dimensions and dynamic flags (or their
//!   absence)
//! - the precision mode is always hashed, even for graphs without a `dot`
//!
//! The same program over new buffers therefore maps to the same compiled
//! artifact, and switching precision never reuses an artifact compiled under
//! another mode.

use sha2::{Digest, Sha256};
use tardy_dtype::CanonicalShape;

use crate::graph::CapturedGraph;
use crate::op::Op;
use crate::precision::Precision;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 16 hex digits, for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..16].to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Fingerprint `graph` as compiled under `precision`.
pub fn fingerprint(graph: &CapturedGraph, precision: Precision) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(b"tardy-graph-v1");
    write_len(&mut hasher, graph.nodes().len());

    let mut next_parameter = 0u64;
    for node in graph.nodes() {
        hasher.update([node.op.tag()]);
        match &node.op {
            // Position instead of identity.
            Op::DeviceData { .. } => {
                hasher.update(next_parameter.to_le_bytes());
                next_parameter += 1;
            }
            Op::Constant(value) => {
                hasher.update([value.tag()]);
                hasher.update(value.to_bits().to_le_bytes());
            }
            Op::Unary(op) => hasher.update([*op as u8]),
            Op::Binary(op) => hasher.update([*op as u8]),
            Op::Compare(op) => hasher.update([*op as u8]),
            Op::Select | Op::Dot => {}
            Op::Cast(dtype) => hasher.update([dtype.tag()]),
            Op::Reshape(dims) | Op::Broadcast(dims) => write_usizes(&mut hasher, dims),
            Op::Permute(axes) => write_usizes(&mut hasher, axes),
            Op::Reduce { op, axes } => {
                hasher.update([*op as u8]);
                write_usizes(&mut hasher, axes);
            }
        }

        write_shape(&mut hasher, &node.shape);

        write_len(&mut hasher, node.operands.len());
        for operand in &node.operands {
            // Operands precede their users in the post-order.
            let position = graph.position(operand.id).unwrap_or(usize::MAX);
            write_len(&mut hasher, position);
        }
    }

    write_len(&mut hasher, graph.outputs().len());
    for output in graph.outputs() {
        write_len(&mut hasher, graph.position(output.id).unwrap_or(usize::MAX));
    }

    hasher.update([precision.tag()]);
    Fingerprint(hasher.finalize().into())
}

fn write_len(hasher: &mut Sha256, value: usize) {
    hasher.update((value as u64).to_le_bytes());
}

fn write_usizes(hasher: &mut Sha256, values: &[usize]) {
    write_len(hasher, values.len());
    for &value in values {
        write_len(hasher, value);
    }
}

fn write_shape(hasher: &mut Sha256, shape: &CanonicalShape) {
    hasher.update([shape.dtype().tag()]);
    write_usizes(hasher, shape.dims());
    match shape.dynamic() {
        None => hasher.update([0u8]),
        Some(flags) => {
            hasher.update([1u8]);
            hasher.update(flags.iter().map(|&d| d as u8).collect::<Vec<_>>());
        }
    }
}
