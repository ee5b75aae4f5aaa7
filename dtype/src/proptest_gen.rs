use crate::*;
use proptest::prelude::*;

#[rustfmt::skip]
impl DType {
    pub fn int_generator() -> impl Strategy<Value = Self> {
        prop_oneof![
            Just(DType::Int8), Just(DType::Int16), Just(DType::Int32), Just(DType::Int64),
            Just(DType::UInt8), Just(DType::UInt16), Just(DType::UInt32), Just(DType::UInt64),
        ]
    }

    pub fn float_generator() -> impl Strategy<Value = Self> {
        prop_oneof![
            Just(DType::Float16), Just(DType::BFloat16), Just(DType::Float32), Just(DType::Float64)
        ]
    }

    pub fn scalar_generator() -> impl Strategy<Value = Self> {
        prop_oneof![Just(DType::Bool), Self::int_generator(), Self::float_generator()]
    }
}

#[rustfmt::skip]
impl HostDType {
    /// Host types with a canonical counterpart.
    pub fn supported_generator() -> impl Strategy<Value = Self> {
        prop_oneof![
            Just(HostDType::Bool),
            Just(HostDType::UInt8), Just(HostDType::Int8), Just(HostDType::Int16),
            Just(HostDType::Int32), Just(HostDType::Int64), Just(HostDType::UInt16),
            Just(HostDType::UInt32), Just(HostDType::UInt64),
            Just(HostDType::Float16), Just(HostDType::BFloat16),
            Just(HostDType::Float32), Just(HostDType::Float64),
        ]
    }

    pub fn unsupported_generator() -> impl Strategy<Value = Self> {
        prop_oneof![
            Just(HostDType::Complex64), Just(HostDType::Complex128),
            Just(HostDType::QInt8), Just(HostDType::QUInt8),
        ]
    }
}

impl HostShape {
    /// Well-formed host shapes of rank 0..=5 over supported dtypes.
    pub fn valid_generator() -> impl Strategy<Value = Self> {
        (HostDType::supported_generator(), prop::collection::vec((0i64..17, any::<bool>()), 0..=5)).prop_map(
            |(dtype, dims)| {
                let (sizes, dynamic): (Vec<_>, Vec<_>) = dims.into_iter().unzip();
                HostShape::with_dynamic(dtype, sizes, dynamic)
            },
        )
    }
}
