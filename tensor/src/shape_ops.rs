//! Shape manipulation: reshape, permute, transpose, squeeze and unsqueeze.

use smallvec::SmallVec;
use snafu::ensure;
use tardy_dtype::Dims;
use tardy_ir::{Axes, Op};

use crate::LazyTensor;
use crate::error::*;

/// Normalize a possibly negative axis against `ndim`.
pub(crate) fn normalize_axis(axis: isize, ndim: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + ndim as isize } else { axis };
    ensure!((0..ndim as isize).contains(&resolved), AxisOutOfRangeSnafu { axis, ndim });
    Ok(resolved as usize)
}

impl LazyTensor {
    /// Reshape, inferring at most one `-1` dimension.
    ///
    /// ```ignore
    /// let t = ctx.from_slice(device, &[6], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])?;
    /// let m = t.try_reshape(&[-1, 2])?; // [3, 2]
    /// ```
    #[track_caller]
    pub fn try_reshape(&self, shape: &[isize]) -> Result<LazyTensor> {
        let dims = self.resolve_dims(shape)?;
        if dims.as_slice() == self.dims() {
            return Ok(self.clone());
        }
        self.record(Op::Reshape(dims), &[self])
    }

    fn resolve_dims(&self, shape: &[isize]) -> Result<Dims> {
        let mismatch = || ReshapeSizeMismatchSnafu { from: self.dims().to_vec(), to: shape.to_vec() };
        let mut infer = None;
        let mut known = 1usize;
        for (i, &dim) in shape.iter().enumerate() {
            match dim {
                -1 => {
                    ensure!(infer.is_none(), MultipleInferDimensionsSnafu);
                    infer = Some(i);
                }
                d if d < 0 => return NegativeDimensionSnafu { dim: d }.fail(),
                d => known *= d as usize,
            }
        }

        let numel = self.shape().numel();
        let mut dims: Dims = shape.iter().map(|&d| d.max(0) as usize).collect();
        if let Some(i) = infer {
            ensure!(known != 0 && numel % known == 0, mismatch());
            dims[i] = numel / known;
        } else {
            ensure!(known == numel, mismatch());
        }
        Ok(dims)
    }

    /// Reorder dimensions; `axes[i]` is the source of output dimension `i`.
    #[track_caller]
    pub fn try_permute(&self, axes: &[isize]) -> Result<LazyTensor> {
        let ndim = self.rank();
        let invalid = || InvalidPermutationSnafu { axes: axes.to_vec(), ndim };
        ensure!(axes.len() == ndim, invalid());

        let mut seen = vec![false; ndim];
        let mut permutation = Axes::new();
        for &axis in axes {
            let axis = normalize_axis(axis, ndim).map_err(|_| invalid().build())?;
            ensure!(!seen[axis], invalid());
            seen[axis] = true;
            permutation.push(axis);
        }
        if permutation.iter().enumerate().all(|(i, &a)| i == a) {
            return Ok(self.clone());
        }
        self.record(Op::Permute(permutation), &[self])
    }

    /// Swap two dimensions.
    pub fn try_transpose(&self, dim0: isize, dim1: isize) -> Result<LazyTensor> {
        let ndim = self.rank();
        let (a, b) = (normalize_axis(dim0, ndim)?, normalize_axis(dim1, ndim)?);
        let mut axes: Vec<isize> = (0..ndim as isize).collect();
        axes.swap(a, b);
        self.try_permute(&axes)
    }

    /// Drop size-1 dimensions: all of them, or only `dim`.
    pub fn try_squeeze(&self, dim: Option<isize>) -> Result<LazyTensor> {
        let dims: Vec<isize> = match dim {
            None => self.dims().iter().filter(|&&d| d != 1).map(|&d| d as isize).collect(),
            Some(dim) => {
                let axis = normalize_axis(dim, self.rank())?;
                if self.dims()[axis] != 1 {
                    return Ok(self.clone());
                }
                self.dims().iter().enumerate().filter(|&(i, _)| i != axis).map(|(_, &d)| d as isize).collect()
            }
        };
        self.try_reshape(&dims)
    }

    /// Insert a size-1 dimension at `dim` (in the output rank).
    pub fn try_unsqueeze(&self, dim: isize) -> Result<LazyTensor> {
        let axis = normalize_axis(dim, self.rank() + 1)?;
        let mut dims: SmallVec<[isize; 4]> = self.dims().iter().map(|&d| d as isize).collect();
        dims.insert(axis, 1);
        self.try_reshape(&dims)
    }

    pub fn flatten(&self) -> Result<LazyTensor> {
        self.try_reshape(&[-1])
    }
}
