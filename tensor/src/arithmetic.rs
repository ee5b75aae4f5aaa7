//! Element-wise operations.

use tardy_dtype::DType;
use tardy_ir::{BinaryOp, CompareOp, Op, UnaryOp};

use crate::LazyTensor;
use crate::error::*;

/// Generates `try_*` methods that align operands and record one node.
macro_rules! impl_tensor_ops {
    (
        binary { $($bin_method:ident => $bin_op:ident),* $(,)? }
        compare { $($cmp_method:ident => $cmp_op:ident),* $(,)? }
        unary { $($un_method:ident => $un_op:ident),* $(,)? }
    ) => {
        $(
            #[track_caller]
            pub fn $bin_method(&self, other: &LazyTensor) -> Result<LazyTensor> {
                let (lhs, rhs) = self.align(other)?;
                lhs.record(Op::Binary(BinaryOp::$bin_op), &[&lhs, &rhs])
            }
        )*

        $(
            #[track_caller]
            pub fn $cmp_method(&self, other: &LazyTensor) -> Result<LazyTensor> {
                let (lhs, rhs) = self.align(other)?;
                lhs.record(Op::Compare(CompareOp::$cmp_op), &[&lhs, &rhs])
            }
        )*

        $(
            #[track_caller]
            pub fn $un_method(&self) -> Result<LazyTensor> {
                self.record(Op::Unary(UnaryOp::$un_op), &[self])
            }
        )*
    };
}

impl LazyTensor {
    impl_tensor_ops! {
        binary {
            try_add => Add,
            try_sub => Sub,
            try_mul => Mul,
            try_div => Div,
            try_pow => Pow,
            maximum => Max,
            minimum => Min,
            logical_and => And,
            logical_or => Or,
        }
        compare {
            try_eq => Eq,
            try_ne => Ne,
            try_lt => Lt,
            try_le => Le,
            try_gt => Gt,
            try_ge => Ge,
        }
        unary {
            try_neg => Neg,
            try_abs => Abs,
            try_exp => Exp,
            try_log => Log,
            try_sqrt => Sqrt,
            try_tanh => Tanh,
            logical_not => Not,
        }
    }

    /// `condition ? self : other`, broadcasting all three to one shape.
    pub fn where_(&self, condition: &LazyTensor, other: &LazyTensor) -> Result<LazyTensor> {
        let (on_true, on_false) = self.align(other)?;
        let dims = crate::broadcast::broadcast_dims(condition.dims(), on_true.dims())?;
        let condition = condition.cast(DType::Bool)?.broadcast_to(&dims)?;
        let on_true = on_true.broadcast_to(&dims)?;
        let on_false = on_false.broadcast_to(&dims)?;
        condition.record(Op::Select, &[&condition, &on_true, &on_false])
    }

    /// `max(self, 0)`.
    pub fn relu(&self) -> Result<LazyTensor> {
        let zero = self.ctx.full(self.device(), self.shape().clone(), tardy_ir::ConstValue::zero(self.dtype()));
        self.maximum(&zero)
    }

    /// Clamp into `[min, max]`.
    pub fn clamp(&self, min: &LazyTensor, max: &LazyTensor) -> Result<LazyTensor> {
        self.maximum(min)?.minimum(max)
    }
}
