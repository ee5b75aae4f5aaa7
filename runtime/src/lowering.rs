//! Reduced-precision matrix unit emulation.
//!
//! The emulated matrix unit multiplies bf16 operands exactly and accumulates
//! in f32. Higher precision modes split every f32 operand into bf16 pieces
//!
//! ```text
//! x = hi + mid + lo        hi = bf16(x), mid = bf16(x - hi), lo = bf16(x - hi - mid)
//! ```
//!
//! and run one matrix product per kept pair of pieces:
//!
//! | mode      | pairs                                         |
//! |-----------|-----------------------------------------------|
//! | `default` | hi·hi                                         |
//! | `high`    | hi·hi, hi·r, r·hi  (r = bf16(x - hi))         |
//! | `highest` | hi·hi, hi·mid, mid·hi, hi·lo, lo·hi, mid·mid  |
//!
//! Pass results are added smallest-first in f32.

use rayon::prelude::*;
use tardy_ir::Precision;

/// Row count above which matrix products are split across rayon workers.
const PARALLEL_ROWS: usize = 64;

fn bf16_round(x: f32) -> f32 {
    half::bf16::from_f32(x).to_f32()
}

/// Split `x` into bf16-representable pieces `[hi, mid, lo]`.
///
/// Non-finite values keep everything in `hi`.
pub fn split(x: f32) -> [f32; 3] {
    let hi = bf16_round(x);
    if !x.is_finite() || !hi.is_finite() {
        return [hi, 0.0, 0.0];
    }
    let rest = x - hi;
    let mid = bf16_round(rest);
    let lo = bf16_round(rest - mid);
    [hi, mid, lo]
}

/// Piece pairs multiplied under `precision`, largest contribution first.
///
/// Indices refer to [`split`]; under `high` piece `1` is the rounded
/// residual `bf16(x - hi)`.
pub const fn passes(precision: Precision) -> &'static [(usize, usize)] {
    match precision {
        Precision::Default => &[(0, 0)],
        Precision::High => &[(0, 0), (0, 1), (1, 0)],
        Precision::Highest => &[(0, 0), (0, 1), (1, 0), (0, 2), (2, 0), (1, 1)],
    }
}

fn pieces(values: &[f32], precision: Precision) -> [Vec<f32>; 3] {
    let mut out = [Vec::with_capacity(values.len()), Vec::with_capacity(values.len()), Vec::with_capacity(values.len())];
    for &x in values {
        let [hi, mid, lo] = split(x);
        let (mid, lo) = match precision {
            // Residual must itself be bf16 for the product to stay exact.
            Precision::High => (bf16_round(mid + lo), 0.0),
            _ => (mid, lo),
        };
        out[0].push(hi);
        out[1].push(mid);
        out[2].push(lo);
    }
    out
}

/// `[m, k] x [k, n]` product with f32 accumulation of exact bf16 products.
fn matmul_f32(lhs: &[f32], rhs: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let row = |i: usize| -> Vec<f32> {
        (0..n)
            .map(|j| (0..k).fold(0.0f32, |acc, p| acc + lhs[i * k + p] * rhs[p * n + j]))
            .collect()
    };
    if m >= PARALLEL_ROWS {
        (0..m).into_par_iter().flat_map_iter(row).collect()
    } else {
        (0..m).flat_map(row).collect()
    }
}

/// Matrix product of row-major `lhs [m, k]` and `rhs [k, n]` as the matrix
/// unit computes it under `precision`.
pub fn matmul(lhs: &[f32], rhs: &[f32], m: usize, k: usize, n: usize, precision: Precision) -> Vec<f32> {
    debug_assert_eq!(lhs.len(), m * k);
    debug_assert_eq!(rhs.len(), k * n);

    let lhs_pieces = pieces(lhs, precision);
    let rhs_pieces = pieces(rhs, precision);

    let mut result = vec![0.0f32; m * n];
    for &(a, b) in passes(precision).iter().rev() {
        let partial = matmul_f32(&lhs_pieces[a], &rhs_pieces[b], m, k, n);
        result.iter_mut().zip(partial).for_each(|(acc, p)| *acc += p);
    }
    result
}

/// Single product `a * b` under `precision`.
pub fn multiply(a: f32, b: f32, precision: Precision) -> f32 {
    matmul(&[a], &[b], 1, 1, 1, precision)[0]
}
