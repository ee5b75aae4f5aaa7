//! Host kernels of the reference backend.
//!
//! Every kernel computes in the wide value class of [`Data`] and hands the
//! result to [`Literal::new`], which rounds or wraps it to the result dtype.

use rayon::prelude::*;
use snafu::{ResultExt, ensure};
use tardy_device::{Data, Literal};
use tardy_dtype::{CanonicalShape, DType};
use tardy_ir::{BinaryOp, CompareOp, ConstValue, Precision, ReduceOp, UnaryOp};

use crate::error::{DivisionByZeroSnafu, KernelError, LiteralSnafu, NoKernelSnafu};
use crate::lowering;

type Result<T, E = KernelError> = std::result::Result<T, E>;

/// Element count above which element-wise kernels run on rayon.
const PARALLEL_ELEMENTS: usize = 1 << 15;

fn map1<T: Sync, U: Send>(x: &[T], f: impl Fn(&T) -> U + Sync + Send) -> Vec<U> {
    if x.len() >= PARALLEL_ELEMENTS { x.par_iter().map(f).collect() } else { x.iter().map(f).collect() }
}

fn map2<T: Sync, U: Send>(a: &[T], b: &[T], f: impl Fn(&T, &T) -> U + Sync + Send) -> Vec<U> {
    if a.len() >= PARALLEL_ELEMENTS {
        a.par_iter().zip(b.par_iter()).map(|(x, y)| f(x, y)).collect()
    } else {
        a.iter().zip(b).map(|(x, y)| f(x, y)).collect()
    }
}

fn finish(shape: &CanonicalShape, data: Data) -> Result<Literal> {
    Literal::new(shape.clone(), data).context(LiteralSnafu)
}

fn no_kernel<T>(op: &'static str, data: &Data) -> Result<T> {
    NoKernelSnafu { op, class: data.class() }.fail()
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

pub fn constant(value: ConstValue, shape: &CanonicalShape) -> Literal {
    Literal::filled(shape.clone(), value)
}

pub fn unary(op: UnaryOp, x: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    use UnaryOp::*;

    let data = match (x.data(), op) {
        (Data::Float(v), Neg) => Data::Float(map1(v, |&a| -a)),
        (Data::Float(v), Abs) => Data::Float(map1(v, |&a| a.abs())),
        (Data::Float(v), Exp) => Data::Float(map1(v, |&a| a.exp())),
        (Data::Float(v), Log) => Data::Float(map1(v, |&a| a.ln())),
        (Data::Float(v), Sqrt) => Data::Float(map1(v, |&a| a.sqrt())),
        (Data::Float(v), Tanh) => Data::Float(map1(v, |&a| a.tanh())),
        (Data::Signed(v), Neg) => Data::Signed(map1(v, |&a| a.wrapping_neg())),
        (Data::Signed(v), Abs) => Data::Signed(map1(v, |&a| a.wrapping_abs())),
        (Data::Signed(v), Not) => Data::Signed(map1(v, |&a| !a)),
        (Data::Unsigned(v), Neg) => Data::Unsigned(map1(v, |&a| a.wrapping_neg())),
        (Data::Unsigned(v), Abs) => Data::Unsigned(v.clone()),
        (Data::Unsigned(v), Not) => Data::Unsigned(map1(v, |&a| !a)),
        (Data::Bool(v), Not) => Data::Bool(map1(v, |&a| !a)),
        (data, op) => return no_kernel(op.into(), data),
    };
    finish(shape, data)
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Max => nan_max(a, b),
        BinaryOp::Min => nan_min(a, b),
        BinaryOp::Pow => a.powf(b),
        BinaryOp::And | BinaryOp::Or => f64::NAN,
    }
}

fn signed_pow(base: i64, exp: i64) -> i64 {
    match (base, exp) {
        (_, e) if e >= 0 => base.wrapping_pow(e.min(u32::MAX as i64) as u32),
        (1, _) => 1,
        (-1, e) => if e % 2 == 0 { 1 } else { -1 },
        _ => 0,
    }
}

fn signed_binary(op: BinaryOp, a: i64, b: i64) -> i64 {
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Min => a.min(b),
        BinaryOp::Pow => signed_pow(a, b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
    }
}

fn unsigned_binary(op: BinaryOp, a: u64, b: u64) -> u64 {
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a / b,
        BinaryOp::Max => a.max(b),
        BinaryOp::Min => a.min(b),
        BinaryOp::Pow => a.wrapping_pow(b.min(u32::MAX as u64) as u32),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
    }
}

pub fn binary(op: BinaryOp, a: &Literal, b: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    let data = match (a.data(), b.data()) {
        (Data::Float(x), Data::Float(y)) if !op.is_bitwise() => Data::Float(map2(x, y, |&p, &q| float_binary(op, p, q))),
        (Data::Signed(x), Data::Signed(y)) => {
            ensure!(op != BinaryOp::Div || !y.contains(&0), DivisionByZeroSnafu);
            Data::Signed(map2(x, y, |&p, &q| signed_binary(op, p, q)))
        }
        (Data::Unsigned(x), Data::Unsigned(y)) => {
            ensure!(op != BinaryOp::Div || !y.contains(&0), DivisionByZeroSnafu);
            Data::Unsigned(map2(x, y, |&p, &q| unsigned_binary(op, p, q)))
        }
        (Data::Bool(x), Data::Bool(y)) => match op {
            BinaryOp::And | BinaryOp::Min => Data::Bool(map2(x, y, |&p, &q| p && q)),
            BinaryOp::Or | BinaryOp::Max => Data::Bool(map2(x, y, |&p, &q| p || q)),
            _ => return no_kernel(op.into(), a.data()),
        },
        (data, _) => return no_kernel(op.into(), data),
    };
    finish(shape, data)
}

fn compare_values<T: PartialOrd>(op: CompareOp, a: &T, b: &T) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
    }
}

pub fn compare(op: CompareOp, a: &Literal, b: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    let result = match (a.data(), b.data()) {
        (Data::Bool(x), Data::Bool(y)) => map2(x, y, |p, q| compare_values(op, p, q)),
        (Data::Signed(x), Data::Signed(y)) => map2(x, y, |p, q| compare_values(op, p, q)),
        (Data::Unsigned(x), Data::Unsigned(y)) => map2(x, y, |p, q| compare_values(op, p, q)),
        (Data::Float(x), Data::Float(y)) => map2(x, y, |p, q| compare_values(op, p, q)),
        (data, _) => return no_kernel("compare", data),
    };
    finish(shape, Data::Bool(result))
}

fn pick<T: Clone>(predicate: &[bool], on_true: &[T], on_false: &[T]) -> Vec<T> {
    predicate.iter().zip(on_true.iter().zip(on_false)).map(|(&p, (t, f))| if p { t.clone() } else { f.clone() }).collect()
}

pub fn select(predicate: &Literal, on_true: &Literal, on_false: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    let Data::Bool(p) = predicate.data() else {
        return no_kernel("select", predicate.data());
    };
    let data = match (on_true.data(), on_false.data()) {
        (Data::Bool(t), Data::Bool(f)) => Data::Bool(pick(p, t, f)),
        (Data::Signed(t), Data::Signed(f)) => Data::Signed(pick(p, t, f)),
        (Data::Unsigned(t), Data::Unsigned(f)) => Data::Unsigned(pick(p, t, f)),
        (Data::Float(t), Data::Float(f)) => Data::Float(pick(p, t, f)),
        (data, _) => return no_kernel("select", data),
    };
    finish(shape, data)
}

fn matmul_with<T: Copy>(
    lhs: &[T],
    rhs: &[T],
    (m, k, n): (usize, usize, usize),
    zero: T,
    mul: impl Fn(T, T) -> T,
    add: impl Fn(T, T) -> T,
) -> Vec<T> {
    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        for j in 0..n {
            out.push((0..k).fold(zero, |acc, p| add(acc, mul(lhs[i * k + p], rhs[p * n + j]))));
        }
    }
    out
}

/// Rank-1/2 matrix product. Float operands narrower than f64 go through the
/// emulated matrix unit under `precision`.
pub fn dot(lhs: &Literal, rhs: &Literal, shape: &CanonicalShape, precision: Precision) -> Result<Literal> {
    let (l, r) = (lhs.shape().dims(), rhs.shape().dims());
    let (m, k) = if l.len() == 2 { (l[0], l[1]) } else { (1, l.first().copied().unwrap_or(1)) };
    let n = if r.len() == 2 { r[1] } else { 1 };
    let dims = (m, k, n);

    let data = match (lhs.data(), rhs.data()) {
        (Data::Float(a), Data::Float(b)) if lhs.dtype() == DType::Float64 => {
            Data::Float(matmul_with(a, b, dims, 0.0, |x, y| x * y, |x, y| x + y))
        }
        (Data::Float(a), Data::Float(b)) => {
            let a: Vec<f32> = a.iter().map(|&v| v as f32).collect();
            let b: Vec<f32> = b.iter().map(|&v| v as f32).collect();
            Data::Float(lowering::matmul(&a, &b, m, k, n, precision).into_iter().map(f64::from).collect())
        }
        (Data::Signed(a), Data::Signed(b)) => {
            Data::Signed(matmul_with(a, b, dims, 0, i64::wrapping_mul, i64::wrapping_add))
        }
        (Data::Unsigned(a), Data::Unsigned(b)) => {
            Data::Unsigned(matmul_with(a, b, dims, 0, u64::wrapping_mul, u64::wrapping_add))
        }
        (data, _) => return no_kernel("dot", data),
    };
    finish(shape, data)
}

pub fn cast(x: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    finish(shape, x.cast(shape.dtype()).into_data())
}

pub fn reshape(x: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    finish(shape, x.data().clone())
}

fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// For every row-major position over `dims`, the dot product of its
/// coordinates with `strides`.
fn index_map(dims: &[usize], strides: &[usize]) -> Vec<usize> {
    let numel: usize = dims.iter().product();
    (0..numel)
        .map(|flat| {
            let mut rem = flat;
            let mut index = 0;
            for axis in (0..dims.len()).rev() {
                index += (rem % dims[axis]) * strides[axis];
                rem /= dims[axis];
            }
            index
        })
        .collect()
}

fn gather(data: &Data, indices: &[usize]) -> Data {
    match data {
        Data::Bool(v) => Data::Bool(indices.iter().map(|&i| v[i]).collect()),
        Data::Signed(v) => Data::Signed(indices.iter().map(|&i| v[i]).collect()),
        Data::Unsigned(v) => Data::Unsigned(indices.iter().map(|&i| v[i]).collect()),
        Data::Float(v) => Data::Float(indices.iter().map(|&i| v[i]).collect()),
    }
}

/// Right-aligned broadcast; size-1 and missing input axes repeat.
pub fn broadcast(x: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    let input = x.shape().dims();
    let output = shape.dims();
    let offset = output.len() - input.len();
    let input_strides = row_major_strides(input);

    let strides: Vec<usize> = (0..output.len())
        .map(|axis| match axis.checked_sub(offset) {
            Some(i) if input[i] != 1 => input_strides[i],
            _ => 0,
        })
        .collect();
    finish(shape, gather(x.data(), &index_map(output, &strides)))
}

/// Output axis `i` is input axis `axes[i]`.
pub fn permute(x: &Literal, axes: &[usize], shape: &CanonicalShape) -> Result<Literal> {
    let input_strides = row_major_strides(x.shape().dims());
    let strides: Vec<usize> = axes.iter().map(|&a| input_strides[a]).collect();
    finish(shape, gather(x.data(), &index_map(shape.dims(), &strides)))
}

fn fold<T: Copy>(values: &[T], targets: &[usize], len: usize, init: T, f: impl Fn(T, T) -> T) -> Vec<T> {
    let mut out = vec![init; len];
    for (&value, &target) in values.iter().zip(targets) {
        out[target] = f(out[target], value);
    }
    out
}

pub fn reduce(op: ReduceOp, axes: &[usize], x: &Literal, shape: &CanonicalShape) -> Result<Literal> {
    let input = x.shape().dims();
    let kept: Vec<usize> = (0..input.len()).filter(|a| !axes.contains(a)).collect();
    let kept_dims: Vec<usize> = kept.iter().map(|&a| input[a]).collect();
    let kept_strides = row_major_strides(&kept_dims);

    let mut strides = vec![0; input.len()];
    for (position, &axis) in kept.iter().enumerate() {
        strides[axis] = kept_strides[position];
    }
    let targets = index_map(input, &strides);
    let len = shape.numel();
    let identity = op.identity(x.dtype());

    let data = match (x.data(), op) {
        (Data::Float(v), ReduceOp::Sum) => Data::Float(fold(v, &targets, len, identity.as_f64(), |a, b| a + b)),
        (Data::Float(v), ReduceOp::Prod) => Data::Float(fold(v, &targets, len, identity.as_f64(), |a, b| a * b)),
        (Data::Float(v), ReduceOp::Max) => Data::Float(fold(v, &targets, len, identity.as_f64(), nan_max)),
        (Data::Float(v), ReduceOp::Min) => Data::Float(fold(v, &targets, len, identity.as_f64(), nan_min)),
        (Data::Signed(v), op) => {
            let init = identity.to_bits() as i64;
            Data::Signed(match op {
                ReduceOp::Sum => fold(v, &targets, len, init, i64::wrapping_add),
                ReduceOp::Prod => fold(v, &targets, len, init, i64::wrapping_mul),
                ReduceOp::Max => fold(v, &targets, len, init, i64::max),
                ReduceOp::Min => fold(v, &targets, len, init, i64::min),
            })
        }
        (Data::Unsigned(v), op) => {
            let init = identity.to_bits();
            Data::Unsigned(match op {
                ReduceOp::Sum => fold(v, &targets, len, init, u64::wrapping_add),
                ReduceOp::Prod => fold(v, &targets, len, init, u64::wrapping_mul),
                ReduceOp::Max => fold(v, &targets, len, init, u64::max),
                ReduceOp::Min => fold(v, &targets, len, init, u64::min),
            })
        }
        (Data::Bool(v), ReduceOp::Max) => Data::Bool(fold(v, &targets, len, false, |a, b| a || b)),
        (Data::Bool(v), ReduceOp::Min) => Data::Bool(fold(v, &targets, len, true, |a, b| a && b)),
        (data, op) => return no_kernel(op.into(), data),
    };
    finish(shape, data)
}
