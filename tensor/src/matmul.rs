//! Matrix products.

use snafu::ensure;
use tardy_ir::Op;

use crate::LazyTensor;
use crate::broadcast::promote;
use crate::error::*;

impl LazyTensor {
    /// Vector or matrix product of rank-1/2 operands.
    ///
    /// The one precision-sensitive operation: its lowering follows the
    /// context's precision mode at the next synchronization.
    ///
    /// | lhs | rhs | result |
    /// |-----|-----|--------|
    /// | `[k]` | `[k]` | `[]` |
    /// | `[m, k]` | `[k]` | `[m]` |
    /// | `[k]` | `[k, n]` | `[n]` |
    /// | `[m, k]` | `[k, n]` | `[m, n]` |
    pub fn dot(&self, other: &LazyTensor) -> Result<LazyTensor> {
        let (lhs_dims, rhs_dims) = (self.rank(), other.rank());
        ensure!(
            (1..=2).contains(&lhs_dims) && (1..=2).contains(&rhs_dims),
            DotDimensionSnafu { lhs_dims, rhs_dims }
        );
        let dtype = promote(self.dtype(), other.dtype())?;
        let (lhs, rhs) = (self.cast(dtype)?, other.cast(dtype)?);
        lhs.record(Op::Dot, &[&lhs, &rhs])
    }

    pub fn matmul(&self, other: &LazyTensor) -> Result<LazyTensor> {
        self.dot(other)
    }

    /// `self · weightᵀ + bias` for a `[out, in]` weight.
    pub fn linear(&self, weight: &LazyTensor, bias: Option<&LazyTensor>) -> Result<LazyTensor> {
        let product = self.dot(&weight.try_transpose(0, -1)?)?;
        match bias {
            Some(bias) => product.try_add(bias),
            None => Ok(product),
        }
    }
}
