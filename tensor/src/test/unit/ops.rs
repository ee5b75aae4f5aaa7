use test_case::test_case;

use crate::test::{DEVICE, assert_close, ctx, f32s};
use crate::{DType, Error, TensorState};

#[test]
fn test_operations_are_lazy() {
    let ctx = ctx();
    let a = f32s(&ctx, &[3], &[1.0, 2.0, 3.0]);
    let b = f32s(&ctx, &[3], &[4.0, 5.0, 6.0]);
    let c = &a + &b;

    assert!(a.is_materialized());
    assert!(!c.is_materialized());
    assert!(matches!(c.state(), TensorState::Unmaterialized(_)));
    assert_eq!(ctx.pending_count(DEVICE), 1);

    assert_eq!(c.to_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
    assert!(c.is_materialized());
    assert_eq!(ctx.pending_count(DEVICE), 0);
}

#[test]
fn test_clones_share_state() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, -2.0]);
    let b = a.try_abs().unwrap();
    let alias = b.clone();
    assert!(alias.same_handle(&b));

    b.realize().unwrap();
    assert!(alias.is_materialized());
    assert_eq!(alias.buffer(), b.buffer());
    assert_eq!(alias.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_chain_over_materialized_value() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    let c = &a * &a;
    assert_eq!(c.to_vec::<f32>().unwrap(), vec![1.0, 4.0]);

    let d = &c - &a;
    assert_eq!(d.to_vec::<f32>().unwrap(), vec![0.0, 2.0]);
    assert_eq!((-&d).to_vec::<f32>().unwrap(), vec![0.0, -2.0]);
}

#[test]
fn test_broadcast_and_promotion() {
    let ctx = ctx();
    let m = f32s(&ctx, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let row = ctx.from_slice(DEVICE, &[3], &[10.0f64, 20.0, 30.0]).unwrap();
    let sum = m.try_add(&row).unwrap();

    assert_eq!(sum.dtype(), DType::Float64);
    assert_eq!(sum.dims(), &[2, 3]);
    assert_eq!(sum.to_vec::<f64>().unwrap(), vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);

    let scalar = f32s(&ctx, &[], &[0.5]);
    assert_eq!((&m * &scalar).to_vec::<f32>().unwrap(), vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);
}

#[test]
fn test_incompatible_broadcast() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    let b = f32s(&ctx, &[3], &[1.0, 2.0, 3.0]);
    assert!(matches!(a.try_add(&b), Err(Error::BroadcastIncompatible { .. })));
}

#[test]
fn test_compare_and_where() {
    let ctx = ctx();
    let x = f32s(&ctx, &[4], &[1.0, 2.0, 3.0, 4.0]);
    let threshold = f32s(&ctx, &[], &[2.0]);
    let zeros = f32s(&ctx, &[], &[0.0]);

    let mask = x.try_gt(&threshold).unwrap();
    assert_eq!(mask.dtype(), DType::Bool);
    assert_eq!(mask.to_vec::<bool>().unwrap(), vec![false, false, true, true]);

    let kept = x.where_(&mask, &zeros).unwrap();
    assert_eq!(kept.to_vec::<f32>().unwrap(), vec![0.0, 0.0, 3.0, 4.0]);
}

#[test]
fn test_relu_and_clamp() {
    let ctx = ctx();
    let x = f32s(&ctx, &[4], &[-2.0, -0.5, 0.5, 2.0]);
    assert_eq!(x.relu().unwrap().to_vec::<f32>().unwrap(), vec![0.0, 0.0, 0.5, 2.0]);

    let lo = f32s(&ctx, &[], &[-1.0]);
    let hi = f32s(&ctx, &[], &[1.0]);
    assert_eq!(x.clamp(&lo, &hi).unwrap().to_vec::<f32>().unwrap(), vec![-1.0, -0.5, 0.5, 1.0]);
}

#[test]
fn test_transcendental() {
    let ctx = ctx();
    let x = f32s(&ctx, &[3], &[0.0, 1.0, 4.0]);
    assert_close(&x.try_sqrt().unwrap().to_vec::<f32>().unwrap(), &[0.0, 1.0, 2.0], 1e-6);
    assert_close(&x.try_exp().unwrap().to_vec::<f32>().unwrap(), &[1.0, std::f32::consts::E, 54.59815], 1e-4);
}

#[test]
fn test_reshape_and_permute() {
    let ctx = ctx();
    let t = f32s(&ctx, &[6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let m = t.try_reshape(&[-1, 3]).unwrap();
    assert_eq!(m.dims(), &[2, 3]);

    let mt = m.try_transpose(0, 1).unwrap();
    assert_eq!(mt.dims(), &[3, 2]);
    assert_eq!(mt.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

    let u = m.try_unsqueeze(0).unwrap();
    assert_eq!(u.dims(), &[1, 2, 3]);
    assert_eq!(u.try_squeeze(None).unwrap().dims(), &[2, 3]);
    assert_eq!(u.flatten().unwrap().dims(), &[6]);
}

#[test_case(&[4, -1, -1] ; "two inferred dimensions")]
#[test_case(&[-2, 3] ; "negative dimension")]
#[test_case(&[4, 2] ; "size mismatch")]
#[test_case(&[-1, 4] ; "inference does not divide")]
fn test_invalid_reshape(shape: &[isize]) {
    let ctx = ctx();
    let t = f32s(&ctx, &[6], &[0.0; 6]);
    assert!(t.try_reshape(shape).is_err());
}

#[test]
fn test_invalid_permutation() {
    let ctx = ctx();
    let m = f32s(&ctx, &[2, 3], &[0.0; 6]);
    assert!(matches!(m.try_permute(&[0, 0]), Err(Error::InvalidPermutation { .. })));
    assert!(matches!(m.try_permute(&[0]), Err(Error::InvalidPermutation { .. })));
    assert!(matches!(m.try_transpose(0, 2), Err(Error::AxisOutOfRange { axis: 2, ndim: 2 })));
}

#[test]
fn test_reductions() {
    let ctx = ctx();
    let m = f32s(&ctx, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    assert_eq!(m.sum(()).unwrap().to_vec::<f32>().unwrap(), vec![21.0]);
    assert_eq!(m.sum(0isize).unwrap().to_vec::<f32>().unwrap(), vec![5.0, 7.0, 9.0]);
    assert_eq!(m.max(-1isize).unwrap().to_vec::<f32>().unwrap(), vec![3.0, 6.0]);
    assert_eq!(m.min(()).unwrap().to_vec::<f32>().unwrap(), vec![1.0]);
    assert_eq!(m.prod(1isize).unwrap().to_vec::<f32>().unwrap(), vec![6.0, 120.0]);

    let kept = m.sum_with().axes(1isize).keepdim(true).call().unwrap();
    assert_eq!(kept.dims(), &[2, 1]);
    assert_eq!(kept.to_vec::<f32>().unwrap(), vec![6.0, 15.0]);

    assert_eq!(m.mean(0isize).unwrap().to_vec::<f32>().unwrap(), vec![2.5, 3.5, 4.5]);
}

#[test]
fn test_integer_mean_is_float() {
    let ctx = ctx();
    let t = ctx.from_slice(DEVICE, &[4], &[1i32, 2, 3, 4]).unwrap();
    let mean = t.mean(()).unwrap();
    assert_eq!(mean.dtype(), DType::Float32);
    assert_eq!(mean.to_vec::<f32>().unwrap(), vec![2.5]);
}

#[test]
fn test_matmul_shapes() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
    let b = f32s(&ctx, &[2, 2], &[5.0, 6.0, 7.0, 8.0]);
    let v = f32s(&ctx, &[2], &[1.0, 1.0]);

    assert_eq!(a.matmul(&b).unwrap().to_vec::<f32>().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
    assert_eq!(a.dot(&v).unwrap().to_vec::<f32>().unwrap(), vec![3.0, 7.0]);
    assert_eq!(v.dot(&v).unwrap().dims(), &[] as &[usize]);

    let cube = f32s(&ctx, &[1, 2, 2], &[0.0; 4]);
    assert!(matches!(cube.dot(&a), Err(Error::DotDimensionError { lhs_dims: 3, rhs_dims: 2 })));
}

#[test]
fn test_linear() {
    let ctx = ctx();
    let x = f32s(&ctx, &[1, 3], &[1.0, 2.0, 3.0]);
    let w = f32s(&ctx, &[2, 3], &[1.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
    let bias = f32s(&ctx, &[2], &[0.5, -0.5]);
    assert_eq!(x.linear(&w, Some(&bias)).unwrap().to_vec::<f32>().unwrap(), vec![1.5, 4.5]);
}

#[test]
fn test_device_mismatch_rejected() {
    let ctx = ctx();
    let a = f32s(&ctx, &[1], &[1.0]);
    let b = ctx.from_slice(crate::DeviceSpec::tpu(1), &[1], &[1.0f32]).unwrap();
    assert!(matches!(a.try_add(&b), Err(Error::Graph { .. })));
}
