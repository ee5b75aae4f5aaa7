//! Operand alignment for binary operations.
//!
//! Before an element-wise binary operation is recorded, both operands are
//! converted to their least upper dtype and broadcast NumPy-style:
//! - shapes align from the right
//! - missing leading dimensions count as 1
//! - sizes must match or one of them must be 1

use smallvec::SmallVec;
use snafu::ensure;
use tardy_dtype::{DType, Dims};
use tardy_ir::Op;

use crate::LazyTensor;
use crate::error::*;

/// Broadcast result of two dimension lists.
pub fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> Result<Dims> {
    let rank = lhs.len().max(rhs.len());
    let padded = |dims: &[usize], i: usize| {
        let offset = rank - dims.len();
        if i < offset { 1 } else { dims[i - offset] }
    };

    (0..rank)
        .map(|i| match (padded(lhs, i), padded(rhs, i)) {
            (a, b) if a == b => Ok(a),
            (1, b) => Ok(b),
            (a, 1) => Ok(a),
            _ => BroadcastIncompatibleSnafu { lhs: lhs.to_vec(), rhs: rhs.to_vec() }.fail(),
        })
        .collect()
}

/// Least dtype both operands convert to without loss.
pub fn promote(lhs: DType, rhs: DType) -> Result<DType> {
    DType::least_upper_dtype(&[lhs, rhs]).ok_or(Error::NoCommonDType { lhs, rhs })
}

impl LazyTensor {
    /// Broadcast to `dims`. Returns `self` when the shape already matches.
    pub fn broadcast_to(&self, dims: &[usize]) -> Result<LazyTensor> {
        if self.dims() == dims {
            return Ok(self.clone());
        }
        let target: Dims = SmallVec::from_slice(dims);
        ensure!(
            broadcast_dims(self.dims(), dims)? == target,
            BroadcastIncompatibleSnafu { lhs: self.dims().to_vec(), rhs: dims.to_vec() }
        );
        self.record(Op::Broadcast(target), &[self])
    }

    /// Convert to `dtype`. Returns `self` when the dtype already matches.
    pub fn cast(&self, dtype: DType) -> Result<LazyTensor> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        self.record(Op::Cast(dtype), &[self])
    }

    /// Promote and broadcast both operands to a common dtype and shape.
    pub(crate) fn align(&self, other: &LazyTensor) -> Result<(LazyTensor, LazyTensor)> {
        let dtype = promote(self.dtype(), other.dtype())?;
        let dims = broadcast_dims(self.dims(), other.dims())?;
        let lhs = self.cast(dtype)?.broadcast_to(&dims)?;
        let rhs = other.cast(dtype)?.broadcast_to(&dims)?;
        Ok((lhs, rhs))
    }
}
