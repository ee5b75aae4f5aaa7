use tardy_dtype::{CanonicalShape, DType};

use super::super::{builder, f32_shape, param};
use crate::*;

fn matmul_graph(b: &GraphBuilder, lhs_id: u64, rhs_id: u64) -> CapturedGraph {
    let x = param(b, lhs_id, &[2, 2]);
    let y = param(b, rhs_id, &[2, 2]);
    let dot = b.record_inferred(Op::Dot, &[x, y]).unwrap();
    CapturedGraph::capture(&[dot])
}

#[test]
fn test_same_program_over_new_buffers_hashes_equal() {
    let b = builder();
    let first = matmul_graph(&b, 1, 2);
    let second = matmul_graph(&b, 7, 8);
    assert_eq!(fingerprint(&first, Precision::Default), fingerprint(&second, Precision::Default));
}

#[test]
fn test_precision_changes_fingerprint() {
    let b = builder();
    let graph = matmul_graph(&b, 1, 2);
    let default = fingerprint(&graph, Precision::Default);
    let high = fingerprint(&graph, Precision::High);
    let highest = fingerprint(&graph, Precision::Highest);
    assert_ne!(default, high);
    assert_ne!(high, highest);
    assert_ne!(default, highest);
}

#[test]
fn test_precision_changes_fingerprint_without_dot() {
    let b = builder();
    let x = param(&b, 1, &[3]);
    let neg = b.record_inferred(Op::Unary(UnaryOp::Neg), &[x]).unwrap();
    let graph = CapturedGraph::capture(&[neg]);
    assert!(!graph.uses_precision());
    assert_ne!(fingerprint(&graph, Precision::Default), fingerprint(&graph, Precision::Highest));
}

#[test]
fn test_constant_value_is_hashed() {
    let b = builder();
    let graph = |value: f64| {
        let x = param(&b, 1, &[2]);
        let c = b.constant(ConstValue::Float(value), f32_shape(&[2]));
        CapturedGraph::capture(&[b.record_inferred(Op::Binary(BinaryOp::Mul), &[x, c]).unwrap()])
    };
    let two = graph(2.0);
    let three = graph(3.0);
    assert_ne!(fingerprint(&two, Precision::Default), fingerprint(&three, Precision::Default));
    assert_eq!(fingerprint(&two, Precision::Default), fingerprint(&graph(2.0), Precision::Default));
}

#[test]
fn test_operand_order_is_hashed() {
    let b = builder();
    let x = param(&b, 1, &[2]);
    let y = param(&b, 2, &[2]);
    let xy = b.record_inferred(Op::Binary(BinaryOp::Sub), &[x.clone(), y.clone()]).unwrap();
    let yx = b.record_inferred(Op::Binary(BinaryOp::Sub), &[y, x]).unwrap();

    // Parameters are numbered by first occurrence, so both graphs read
    // parameter 0 minus parameter 1.
    let xy = CapturedGraph::capture(&[xy]);
    let yx = CapturedGraph::capture(&[yx]);
    assert_eq!(fingerprint(&xy, Precision::Default), fingerprint(&yx, Precision::Default));
}

#[test]
fn test_shared_operand_differs_from_distinct_operands() {
    let b = builder();
    let x = param(&b, 1, &[2]);
    let y = param(&b, 2, &[2]);
    let shared = CapturedGraph::capture(&[b.record_inferred(Op::Binary(BinaryOp::Add), &[x.clone(), x.clone()]).unwrap()]);
    let distinct = CapturedGraph::capture(&[b.record_inferred(Op::Binary(BinaryOp::Add), &[x, y]).unwrap()]);
    assert_eq!(shared.parameters().len(), 1);
    assert_eq!(distinct.parameters().len(), 2);
    assert_ne!(fingerprint(&shared, Precision::Default), fingerprint(&distinct, Precision::Default));
}

#[test]
fn test_dynamic_flags_are_hashed() {
    let b = builder();
    let static_leaf = b.device_data(1, f32_shape(&[2]), std::sync::Arc::new(()));
    let dynamic_shape = CanonicalShape::with_dynamic(DType::Float32, [2], [true]).unwrap();
    let dynamic_leaf = b.device_data(2, dynamic_shape, std::sync::Arc::new(()));

    let a = CapturedGraph::capture(&[static_leaf]);
    let d = CapturedGraph::capture(&[dynamic_leaf]);
    assert_ne!(fingerprint(&a, Precision::Default), fingerprint(&d, Precision::Default));
}

#[test]
fn test_fingerprint_display_is_hex() {
    let b = builder();
    let graph = matmul_graph(&b, 1, 2);
    let hex = fingerprint(&graph, Precision::Default).to_string();
    assert_eq!(hex.len(), 64);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
}
