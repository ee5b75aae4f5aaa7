use tardy_dtype::DType;
use test_case::test_case;

use crate::{ConstValue, ReduceOp};

#[test]
fn test_float_equality_is_bitwise() {
    assert_eq!(ConstValue::Float(f64::NAN), ConstValue::Float(f64::NAN));
    assert_ne!(ConstValue::Float(0.0), ConstValue::Float(-0.0));
    assert_ne!(ConstValue::Int(1), ConstValue::UInt(1));
}

#[test_case(ConstValue::Float(1.00390625), DType::BFloat16, ConstValue::Float(1.0) ; "bf16 rounds to nearest even")]
#[test_case(ConstValue::Float(-3.7), DType::Int32, ConstValue::Int(-3) ; "float truncates toward zero")]
#[test_case(ConstValue::Int(-1), DType::UInt16, ConstValue::UInt(65535) ; "signed wraps into unsigned")]
#[test_case(ConstValue::Int(2), DType::Bool, ConstValue::Bool(true) ; "nonzero is true")]
#[test_case(ConstValue::UInt(u64::MAX), DType::Float32, ConstValue::Float(18446744073709551616.0) ; "u64 to f32")]
fn test_cast(value: ConstValue, to: DType, expected: ConstValue) {
    assert_eq!(value.cast(to), expected);
}

#[test_case(ReduceOp::Max, DType::Int8, ConstValue::Int(-128))]
#[test_case(ReduceOp::Min, DType::Int16, ConstValue::Int(32767))]
#[test_case(ReduceOp::Min, DType::UInt8, ConstValue::UInt(255))]
#[test_case(ReduceOp::Prod, DType::Float32, ConstValue::Float(1.0))]
#[test_case(ReduceOp::Sum, DType::Bool, ConstValue::Bool(false))]
fn test_reduce_identity(op: ReduceOp, dtype: DType, expected: ConstValue) {
    assert_eq!(op.identity(dtype), expected);
}
