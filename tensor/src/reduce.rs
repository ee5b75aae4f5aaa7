//! Reductions over axes.

use bon::bon;
use tardy_dtype::DType;
use tardy_ir::{Axes, ConstValue, Op, ReduceOp};

use crate::LazyTensor;
use crate::error::*;
use crate::shape_ops::normalize_axis;

/// Axes to reduce over.
///
/// - all axes: `AxisSpec::All` (from `()`)
/// - one axis: `AxisSpec::Single(-1)` (from `isize`)
/// - several axes: `AxisSpec::Multiple(vec![0, 2])` (from `&[isize]` or `Vec<isize>`)
#[derive(Debug, Clone)]
pub enum AxisSpec {
    All,
    Single(isize),
    Multiple(Vec<isize>),
}

impl From<()> for AxisSpec {
    fn from(_: ()) -> Self {
        Self::All
    }
}

impl From<isize> for AxisSpec {
    fn from(axis: isize) -> Self {
        Self::Single(axis)
    }
}

impl From<&[isize]> for AxisSpec {
    fn from(axes: &[isize]) -> Self {
        Self::Multiple(axes.to_vec())
    }
}

impl From<Vec<isize>> for AxisSpec {
    fn from(axes: Vec<isize>) -> Self {
        Self::Multiple(axes)
    }
}

impl AxisSpec {
    /// Sorted, deduplicated, non-negative axes.
    fn resolve(&self, ndim: usize) -> Result<Axes> {
        let mut axes: Axes = match self {
            Self::All => (0..ndim).collect(),
            Self::Single(axis) => std::iter::once(normalize_axis(*axis, ndim)?).collect(),
            Self::Multiple(axes) => axes.iter().map(|&a| normalize_axis(a, ndim)).collect::<Result<_>>()?,
        };
        axes.sort_unstable();
        axes.dedup();
        Ok(axes)
    }
}

fn reduce(tensor: &LazyTensor, op: ReduceOp, axes: AxisSpec, keepdim: bool) -> Result<LazyTensor> {
    let axes = axes.resolve(tensor.rank())?;
    let reduced = if axes.is_empty() { tensor.clone() } else { tensor.record(Op::Reduce { op, axes: axes.clone() }, &[tensor])? };
    if !keepdim {
        return Ok(reduced);
    }
    let kept: Vec<isize> =
        tensor.dims().iter().enumerate().map(|(i, &d)| if axes.contains(&i) { 1 } else { d as isize }).collect();
    reduced.try_reshape(&kept)
}

#[bon]
impl LazyTensor {
    pub fn sum(&self, axes: impl Into<AxisSpec>) -> Result<LazyTensor> {
        reduce(self, ReduceOp::Sum, axes.into(), false)
    }

    /// Sum with `keepdim`.
    ///
    /// ```ignore
    /// tensor.sum_with().axes(0).keepdim(true).call()?;
    /// ```
    #[builder]
    pub fn sum_with(&self, axes: impl Into<AxisSpec>, #[builder(default = false)] keepdim: bool) -> Result<LazyTensor> {
        reduce(self, ReduceOp::Sum, axes.into(), keepdim)
    }

    pub fn prod(&self, axes: impl Into<AxisSpec>) -> Result<LazyTensor> {
        reduce(self, ReduceOp::Prod, axes.into(), false)
    }

    pub fn max(&self, axes: impl Into<AxisSpec>) -> Result<LazyTensor> {
        reduce(self, ReduceOp::Max, axes.into(), false)
    }

    #[builder]
    pub fn max_with(&self, axes: impl Into<AxisSpec>, #[builder(default = false)] keepdim: bool) -> Result<LazyTensor> {
        reduce(self, ReduceOp::Max, axes.into(), keepdim)
    }

    pub fn min(&self, axes: impl Into<AxisSpec>) -> Result<LazyTensor> {
        reduce(self, ReduceOp::Min, axes.into(), false)
    }

    /// Mean over `axes`. Integer and predicate inputs average in `f32`.
    pub fn mean(&self, axes: impl Into<AxisSpec>) -> Result<LazyTensor> {
        let axes = axes.into();
        let count: usize = axes.resolve(self.rank())?.iter().map(|&a| self.dims()[a]).product();
        let input = if self.dtype().is_float() { self.clone() } else { self.cast(DType::Float32)? };
        let sum = reduce(&input, ReduceOp::Sum, axes, false)?;
        let divisor = self.ctx.full(self.device(), sum.shape().clone(), ConstValue::Float(count as f64));
        sum.try_div(&divisor)
    }
}
