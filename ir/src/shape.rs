//! Result-shape inference per operator kind.
//!
//! Element-wise kinds require operands with identical dtype and dimensions;
//! broadcasting is an explicit [`Op::Broadcast`] node. Dtype *support* (for
//! example `dot` over predicates) is left to the compiler, which knows what
//! its backend can lower.

use snafu::{ResultExt, ensure};
use tardy_dtype::{CanonicalShape, DType, Dims, DynamicFlags, checked_numel};

use crate::error::*;
use crate::op::Op;

/// Infer the shape of `op` applied to `operands`.
pub fn infer(op: &Op, operands: &[&CanonicalShape]) -> Result<CanonicalShape> {
    ensure!(
        operands.len() == op.arity(),
        ArityMismatchSnafu { op: op.name(), expected: op.arity(), actual: operands.len() }
    );

    match op {
        Op::DeviceData { .. } | Op::Constant(_) => LeafOperationSnafu { op: op.name() }.fail(),
        Op::Unary(_) => Ok(operands[0].clone()),
        Op::Binary(_) => elementwise(op.name(), operands[0], operands[1], operands[0].dtype()),
        Op::Compare(_) => elementwise(op.name(), operands[0], operands[1], DType::Bool),
        Op::Select => select(operands[0], operands[1], operands[2]),
        Op::Dot => dot(operands[0], operands[1]),
        Op::Cast(dtype) => Ok(operands[0].with_dtype(*dtype)),
        Op::Reshape(dims) => reshape(operands[0], dims),
        Op::Broadcast(dims) => broadcast(operands[0], dims),
        Op::Permute(perm) => permute(operands[0], perm),
        Op::Reduce { axes, .. } => reduce(operands[0], axes),
    }
}

fn flags_of(shape: &CanonicalShape) -> DynamicFlags {
    match shape.dynamic() {
        Some(flags) => flags.iter().copied().collect(),
        None => DynamicFlags::from_elem(false, shape.rank()),
    }
}

fn build(dtype: DType, dims: impl IntoIterator<Item = usize>, flags: DynamicFlags) -> Result<CanonicalShape> {
    CanonicalShape::with_optional_dynamic(dtype, dims, Some(flags)).context(ShapeSnafu)
}

fn elementwise(op: &'static str, lhs: &CanonicalShape, rhs: &CanonicalShape, out: DType) -> Result<CanonicalShape> {
    ensure!(lhs.dtype() == rhs.dtype(), DTypeMismatchSnafu { op, lhs: lhs.dtype(), rhs: rhs.dtype() });
    ensure!(lhs.same_dims(rhs), ShapeMismatchSnafu { op, lhs: lhs.dims(), rhs: rhs.dims() });

    // A dimension is dynamic if it is dynamic in either operand.
    let flags = flags_of(lhs).iter().zip(flags_of(rhs).iter()).map(|(&a, &b)| a || b).collect();
    build(out, lhs.dims().iter().copied(), flags)
}

fn select(pred: &CanonicalShape, on_true: &CanonicalShape, on_false: &CanonicalShape) -> Result<CanonicalShape> {
    ensure!(pred.dtype() == DType::Bool, PredicateRequiredSnafu { actual: pred.dtype() });
    ensure!(pred.same_dims(on_true), ShapeMismatchSnafu { op: "select", lhs: pred.dims(), rhs: on_true.dims() });
    elementwise("select", on_true, on_false, on_true.dtype())
}

fn dot(lhs: &CanonicalShape, rhs: &CanonicalShape) -> Result<CanonicalShape> {
    ensure!(lhs.dtype() == rhs.dtype(), DTypeMismatchSnafu { op: "dot", lhs: lhs.dtype(), rhs: rhs.dtype() });

    let (l, r) = (lhs.dims(), rhs.dims());
    let (contract_l, contract_r, dims): (usize, usize, Dims) = match (l.len(), r.len()) {
        (1, 1) => (l[0], r[0], Dims::new()),
        (2, 1) => (l[1], r[0], Dims::from_slice(&[l[0]])),
        (1, 2) => (l[0], r[0], Dims::from_slice(&[r[1]])),
        (2, 2) => (l[1], r[0], Dims::from_slice(&[l[0], r[1]])),
        (lhs_rank, rhs_rank) => return DotRankUnsupportedSnafu { lhs_rank, rhs_rank }.fail(),
    };
    ensure!(contract_l == contract_r, DotContractionMismatchSnafu { lhs: contract_l, rhs: contract_r });

    Ok(CanonicalShape::new(lhs.dtype(), dims))
}

fn reshape(input: &CanonicalShape, dims: &Dims) -> Result<CanonicalShape> {
    let output_size = checked_numel(input.dtype(), dims).context(ShapeSnafu)?;
    ensure!(input.numel() == output_size, ReshapeSizeMismatchSnafu { input_size: input.numel(), output_size });
    Ok(CanonicalShape::new(input.dtype(), dims.iter().copied()))
}

fn broadcast(input: &CanonicalShape, dims: &Dims) -> Result<CanonicalShape> {
    let from = input.dims();
    let invalid = || BroadcastInvalidSnafu { from: from.to_vec(), to: dims.to_vec() };
    ensure!(from.len() <= dims.len(), invalid());
    checked_numel(input.dtype(), dims).context(ShapeSnafu)?;

    let offset = dims.len() - from.len();
    let source_flags = flags_of(input);
    let mut flags = DynamicFlags::from_elem(false, dims.len());
    for (i, &size) in from.iter().enumerate() {
        ensure!(size == dims[offset + i] || size == 1, invalid());
        flags[offset + i] = source_flags[i] && size == dims[offset + i];
    }

    build(input.dtype(), dims.iter().copied(), flags)
}

fn permute(input: &CanonicalShape, perm: &[usize]) -> Result<CanonicalShape> {
    let rank = input.rank();
    let mut seen = vec![false; rank];
    let valid = perm.len() == rank && perm.iter().all(|&axis| axis < rank && !std::mem::replace(&mut seen[axis], true));
    ensure!(valid, PermuteInvalidPermutationSnafu { permutation: perm.to_vec(), expected_dims: rank });

    let flags = flags_of(input);
    build(input.dtype(), perm.iter().map(|&axis| input.dims()[axis]), perm.iter().map(|&axis| flags[axis]).collect())
}

fn reduce(input: &CanonicalShape, axes: &[usize]) -> Result<CanonicalShape> {
    let rank = input.rank();
    let mut reduced = vec![false; rank];
    for &axis in axes {
        ensure!(axis < rank, AxisOutOfRangeSnafu { axis, rank });
        ensure!(!std::mem::replace(&mut reduced[axis], true), DuplicateAxisSnafu { axis });
    }

    let flags = flags_of(input);
    let kept = (0..rank).filter(|&axis| !reduced[axis]);
    build(input.dtype(), kept.clone().map(|axis| input.dims()[axis]), kept.map(|axis| flags[axis]).collect())
}
