//! Scalar constants and operator sub-kinds.

use std::hash::{Hash, Hasher};
use std::mem::discriminant;

use tardy_dtype::DType;

/// Constant value that can be stored in a node.
///
/// Equality and hashing compare floats by bit pattern, so `NaN == NaN` when
/// the payload bits match and `0.0 != -0.0`. Hash consing relies on this.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// Helper macro to cast to target width and back to storage type (for proper truncation/extension).
macro_rules! cast_via {
    ($v:expr, $target:ty, $storage:ty) => {
        ($v as $target) as $storage
    };
}

fn from_i64(v: i64, to: DType) -> ConstValue {
    use DType::*;
    match to {
        Bool => ConstValue::Bool(v != 0),
        Int8 => ConstValue::Int(cast_via!(v, i8, i64)),
        Int16 => ConstValue::Int(cast_via!(v, i16, i64)),
        Int32 => ConstValue::Int(cast_via!(v, i32, i64)),
        Int64 => ConstValue::Int(v),
        UInt8 => ConstValue::UInt(cast_via!(v, u8, u64)),
        UInt16 => ConstValue::UInt(cast_via!(v, u16, u64)),
        UInt32 => ConstValue::UInt(cast_via!(v, u32, u64)),
        UInt64 => ConstValue::UInt(v as u64),
        Float16 | BFloat16 | Float32 | Float64 => ConstValue::Float(v as f64).cast(to),
    }
}

impl ConstValue {
    /// Natural dtype of the variant.
    pub const fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int(_) => DType::Int64,
            Self::UInt(_) => DType::UInt64,
            Self::Float(_) => DType::Float64,
        }
    }

    pub const fn zero(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Self::Bool(false),
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 => Self::Int(0),
            DType::UInt8 | DType::UInt16 | DType::UInt32 | DType::UInt64 => Self::UInt(0),
            DType::Float16 | DType::BFloat16 | DType::Float32 | DType::Float64 => Self::Float(0.0),
        }
    }

    pub const fn one(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Self::Bool(true),
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 => Self::Int(1),
            DType::UInt8 | DType::UInt16 | DType::UInt32 | DType::UInt64 => Self::UInt(1),
            DType::Float16 | DType::BFloat16 | DType::Float32 | DType::Float64 => Self::Float(1.0),
        }
    }

    /// Convert to the representation of `to`, truncating or rounding the way
    /// a device would store it.
    pub fn cast(self, to: DType) -> Self {
        match (self, to) {
            (Self::Bool(v), _) => from_i64(v as i64, to),
            (Self::Int(v), _) => from_i64(v, to),
            (Self::UInt(v), DType::UInt64) => Self::UInt(v),
            (Self::UInt(v), dt) if dt.is_float() => Self::Float(v as f64).cast(dt),
            (Self::UInt(v), _) => from_i64(v as i64, to),
            (Self::Float(v), DType::Bool) => Self::Bool(v != 0.0),
            (Self::Float(v), DType::Float16) => Self::Float(half::f16::from_f64(v).to_f64()),
            (Self::Float(v), DType::BFloat16) => Self::Float(half::bf16::from_f64(v).to_f64()),
            (Self::Float(v), DType::Float32) => Self::Float(v as f32 as f64),
            (Self::Float(v), DType::Float64) => Self::Float(v),
            // Float-to-unsigned routes through i64 first.
            (Self::Float(v), _) => from_i64(v as i64, to),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Bool(v) => v as u8 as f64,
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Raw 64-bit payload, used by fingerprints.
    pub fn to_bits(&self) -> u64 {
        match *self {
            Self::Bool(v) => v as u64,
            Self::Int(v) => v as u64,
            Self::UInt(v) => v,
            Self::Float(v) => v.to_bits(),
        }
    }

    /// One-byte variant tag, used by fingerprints.
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::UInt(_) => 2,
            Self::Float(_) => 3,
        }
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        discriminant(self) == discriminant(other) && self.to_bits() == other.to_bits()
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        discriminant(self).hash(state);
        self.to_bits().hash(state);
    }
}

impl std::fmt::Display for ConstValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}

/// Unary operation types. All preserve the operand shape and dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Tanh,
    /// Logical not on predicates, bitwise not on integers.
    Not,
}

impl UnaryOp {
    /// Defined only for floating-point operands.
    pub const fn is_transcendental(self) -> bool {
        matches!(self, Self::Exp | Self::Log | Self::Sqrt | Self::Tanh)
    }
}

/// Binary operation types. Both operands share dtype and dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Float division, or integer division truncated toward zero.
    Div,
    Max,
    Min,
    Pow,
    And,
    Or,
}

impl BinaryOp {
    pub const fn is_bitwise(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Comparison types. Result dtype is always `pred`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Reduction operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumIter, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
    Prod,
}

impl ReduceOp {
    /// Identity element of the reduction for `dtype`.
    pub fn identity(self, dtype: DType) -> ConstValue {
        match self {
            Self::Sum => ConstValue::zero(dtype),
            Self::Prod => ConstValue::one(dtype),
            Self::Max => match dtype {
                DType::Bool => ConstValue::Bool(false),
                dt if dt.is_float() => ConstValue::Float(f64::NEG_INFINITY),
                dt if dt.is_unsigned() => ConstValue::UInt(0),
                dt => ConstValue::Int(i64::MIN >> (64 - dt.bits())),
            },
            Self::Min => match dtype {
                DType::Bool => ConstValue::Bool(true),
                dt if dt.is_float() => ConstValue::Float(f64::INFINITY),
                dt if dt.is_unsigned() => ConstValue::UInt(u64::MAX).cast(dt),
                dt => ConstValue::Int(i64::MAX >> (64 - dt.bits())),
            },
        }
    }
}
