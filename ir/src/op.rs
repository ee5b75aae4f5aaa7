//! Operator kinds.
//!
//! An [`Op`] carries the static attributes of a node (constant value, target
//! dtype, permutation, reduction axes). Operands are held by the node itself,
//! so `Op` is cheap to clone and hash.

use smallvec::SmallVec;
use tardy_dtype::{DType, Dims};

use crate::types::{BinaryOp, CompareOp, ConstValue, ReduceOp, UnaryOp};

/// Axis lists (permutations, reduction axes).
pub type Axes = SmallVec<[usize; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    /// Leaf standing for an already materialized device buffer.
    DeviceData { buffer_id: u64 },
    /// Leaf filled with one value.
    Constant(ConstValue),

    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Element-wise comparison producing `pred`.
    Compare(CompareOp),
    /// `select(pred, on_true, on_false)`.
    Select,
    /// Rank-1/2 matrix product. The only precision-sensitive kind.
    Dot,

    Cast(DType),
    Reshape(Dims),
    /// Right-aligned broadcast to the given dimensions.
    Broadcast(Dims),
    Permute(Axes),
    /// Reduce over `axes`, dropping them from the result.
    Reduce { op: ReduceOp, axes: Axes },
}

impl Op {
    /// Number of operands the kind takes.
    pub const fn arity(&self) -> usize {
        match self {
            Self::DeviceData { .. } | Self::Constant(_) => 0,
            Self::Unary(_) | Self::Cast(_) | Self::Reshape(_) | Self::Broadcast(_) | Self::Permute(_) => 1,
            Self::Reduce { .. } => 1,
            Self::Binary(_) | Self::Compare(_) | Self::Dot => 2,
            Self::Select => 3,
        }
    }

    pub const fn is_leaf(&self) -> bool {
        self.arity() == 0
    }

    /// Precision mode changes the lowering of this kind.
    pub const fn is_precision_sensitive(&self) -> bool {
        matches!(self, Self::Dot)
    }

    /// Mnemonic used by the text dump and in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceData { .. } => "parameter",
            Self::Constant(_) => "constant",
            Self::Unary(op) => op.into(),
            Self::Binary(op) => op.into(),
            Self::Compare(_) => "compare",
            Self::Select => "select",
            Self::Dot => "dot",
            Self::Cast(_) => "convert",
            Self::Reshape(_) => "reshape",
            Self::Broadcast(_) => "broadcast",
            Self::Permute(_) => "transpose",
            Self::Reduce { .. } => "reduce",
        }
    }

    /// Stable one-byte tag for serialization.
    pub(crate) const fn tag(&self) -> u8 {
        match self {
            Self::DeviceData { .. } => 0,
            Self::Constant(_) => 1,
            Self::Unary(_) => 2,
            Self::Binary(_) => 3,
            Self::Compare(_) => 4,
            Self::Select => 5,
            Self::Dot => 6,
            Self::Cast(_) => 7,
            Self::Reshape(_) => 8,
            Self::Broadcast(_) => 9,
            Self::Permute(_) => 10,
            Self::Reduce { .. } => 11,
        }
    }
}
