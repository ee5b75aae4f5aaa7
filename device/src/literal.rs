//! Host-side tensor values.
//!
//! A [`Literal`] stores elements in one of four wide classes ([`Data`]) and
//! keeps every value representable in its dtype: floats are rounded through
//! the dtype's format and integers wrap to its width on construction. Kernels
//! can therefore compute in the wide class and re-normalize once per result.

use std::ops::Range;
use std::sync::Arc;

use snafu::{OptionExt, ensure};
use tardy_dtype::{CanonicalShape, DType, HasDType};
use tardy_ir::ConstValue;

use crate::error::*;

/// Element storage, one variant per value class.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Bool(Vec<bool>),
    Signed(Vec<i64>),
    Unsigned(Vec<u64>),
    Float(Vec<f64>),
}

impl Data {
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Signed(v) => v.len(),
            Self::Unsigned(v) => v.len(),
            Self::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn class(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Signed(_) => "signed",
            Self::Unsigned(_) => "unsigned",
            Self::Float(_) => "float",
        }
    }

    /// `n` copies of `value` in the class of `dtype`.
    pub fn filled(dtype: DType, value: ConstValue, n: usize) -> Self {
        match value.cast(dtype) {
            ConstValue::Bool(v) => Self::Bool(vec![v; n]),
            ConstValue::Int(v) => Self::Signed(vec![v; n]),
            ConstValue::UInt(v) => Self::Unsigned(vec![v; n]),
            ConstValue::Float(v) => Self::Float(vec![v; n]),
        }
    }

    pub fn get(&self, index: usize) -> ConstValue {
        match self {
            Self::Bool(v) => ConstValue::Bool(v[index]),
            Self::Signed(v) => ConstValue::Int(v[index]),
            Self::Unsigned(v) => ConstValue::UInt(v[index]),
            Self::Float(v) => ConstValue::Float(v[index]),
        }
    }

    fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Self::Bool(v) => Self::Bool(v[range].to_vec()),
            Self::Signed(v) => Self::Signed(v[range].to_vec()),
            Self::Unsigned(v) => Self::Unsigned(v[range].to_vec()),
            Self::Float(v) => Self::Float(v[range].to_vec()),
        }
    }

    /// Append `other`. Both must hold the same class.
    fn extend(&mut self, other: &Self) {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.extend_from_slice(b),
            (Self::Signed(a), Self::Signed(b)) => a.extend_from_slice(b),
            (Self::Unsigned(a), Self::Unsigned(b)) => a.extend_from_slice(b),
            (Self::Float(a), Self::Float(b)) => a.extend_from_slice(b),
            _ => {}
        }
    }

    fn matches(&self, dtype: DType) -> bool {
        matches!(
            (self, dtype.is_bool(), dtype.is_signed(), dtype.is_unsigned(), dtype.is_float()),
            (Self::Bool(_), true, ..) | (Self::Signed(_), _, true, ..) | (Self::Unsigned(_), _, _, true, _) | (Self::Float(_), .., true)
        )
    }

    /// Round or wrap every value to `dtype`.
    fn normalize(&mut self, dtype: DType) {
        match self {
            Self::Bool(_) => {}
            Self::Signed(values) => {
                if dtype.bits() < 64 {
                    let shift = 64 - dtype.bits();
                    values.iter_mut().for_each(|v| *v = (*v << shift) >> shift);
                }
            }
            Self::Unsigned(values) => {
                if dtype.bits() < 64 {
                    let mask = (1u64 << dtype.bits()) - 1;
                    values.iter_mut().for_each(|v| *v &= mask);
                }
            }
            Self::Float(values) => match dtype {
                DType::Float16 => values.iter_mut().for_each(|v| *v = half::f16::from_f64(*v).to_f64()),
                DType::BFloat16 => values.iter_mut().for_each(|v| *v = half::bf16::from_f64(*v).to_f64()),
                DType::Float32 => values.iter_mut().for_each(|v| *v = *v as f32 as f64),
                _ => {}
            },
        }
    }
}

/// Rust element types that can be read from and written to literals.
pub trait Element: HasDType {
    fn into_const(self) -> ConstValue;
    fn from_const(value: ConstValue) -> Self;
}

macro_rules! impl_element {
    ($variant:ident, $wide:ty: $($ty:ty),*) => {
        $(impl Element for $ty {
            fn into_const(self) -> ConstValue {
                ConstValue::$variant(self as $wide)
            }

            fn from_const(value: ConstValue) -> Self {
                match value.cast(<$ty as HasDType>::DTYPE) {
                    ConstValue::$variant(v) => v as $ty,
                    other => other.as_f64() as $ty,
                }
            }
        })*
    };
}

impl_element!(Int, i64: i8, i16, i32, i64);
impl_element!(UInt, u64: u8, u16, u32, u64);
impl_element!(Float, f64: f32, f64);

impl Element for bool {
    fn into_const(self) -> ConstValue {
        ConstValue::Bool(self)
    }

    fn from_const(value: ConstValue) -> Self {
        value.as_f64() != 0.0
    }
}

impl Element for half::f16 {
    fn into_const(self) -> ConstValue {
        ConstValue::Float(self.to_f64())
    }

    fn from_const(value: ConstValue) -> Self {
        half::f16::from_f64(value.as_f64())
    }
}

impl Element for half::bf16 {
    fn into_const(self) -> ConstValue {
        ConstValue::Float(self.to_f64())
    }

    fn from_const(value: ConstValue) -> Self {
        half::bf16::from_f64(value.as_f64())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    shape: CanonicalShape,
    data: Data,
}

impl Literal {
    /// Build a literal, normalizing values to the dtype of `shape`.
    pub fn new(shape: CanonicalShape, mut data: Data) -> Result<Self> {
        ensure!(data.matches(shape.dtype()), DataClassMismatchSnafu { dtype: shape.dtype(), class: data.class() });
        ensure!(
            data.len() == shape.numel(),
            LiteralLengthSnafu { shape: shape.clone(), expected: shape.numel(), actual: data.len() }
        );
        data.normalize(shape.dtype());
        Ok(Self { shape, data })
    }

    /// Literal of `T` values laid out row-major over `dims`.
    pub fn from_slice<T: Element>(dims: &[usize], values: &[T]) -> Result<Self> {
        let shape = CanonicalShape::new(T::DTYPE, dims.iter().copied());
        let data = match T::DTYPE {
            DType::Bool => Data::Bool(values.iter().map(|&v| v.into_const().as_f64() != 0.0).collect()),
            dt if dt.is_signed() => Data::Signed(values.iter().map(|&v| v.into_const().to_bits() as i64).collect()),
            dt if dt.is_unsigned() => Data::Unsigned(values.iter().map(|&v| v.into_const().to_bits()).collect()),
            _ => Data::Float(values.iter().map(|&v| v.into_const().as_f64()).collect()),
        };
        Self::new(shape, data)
    }

    pub fn scalar<T: Element>(value: T) -> Self {
        let shape = CanonicalShape::scalar(T::DTYPE);
        let data = Data::filled(T::DTYPE, value.into_const(), 1);
        Self { shape, data }
    }

    /// Every element set to `value` (converted to the dtype).
    pub fn filled(shape: CanonicalShape, value: ConstValue) -> Self {
        let data = Data::filled(shape.dtype(), value, shape.numel());
        Self { shape, data }
    }

    pub fn zeros(shape: CanonicalShape) -> Self {
        let zero = ConstValue::zero(shape.dtype());
        Self::filled(shape, zero)
    }

    pub fn shape(&self) -> &CanonicalShape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.shape.dtype()
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn into_data(self) -> Data {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes()
    }

    pub fn get(&self, index: usize) -> ConstValue {
        self.data.get(index)
    }

    /// Elements as `T`; `T` must be the literal's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        ensure!(T::DTYPE == self.dtype(), ElementTypeMismatchSnafu { requested: T::DTYPE, actual: self.dtype() });
        Ok((0..self.len()).map(|i| T::from_const(self.get(i))).collect())
    }

    /// Elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            Data::Float(v) => v.clone(),
            _ => (0..self.len()).map(|i| self.get(i).as_f64()).collect(),
        }
    }

    /// Element-wise conversion.
    pub fn cast(&self, dtype: DType) -> Self {
        if dtype == self.dtype() {
            return self.clone();
        }
        let shape = self.shape.with_dtype(dtype);
        let data = match (&self.data, dtype) {
            (Data::Float(values), dt) if dt.is_float() => {
                let mut data = Data::Float(values.clone());
                data.normalize(dt);
                data
            }
            _ => {
                let values = (0..self.len()).map(|i| self.get(i).cast(dtype));
                collect_class(dtype, values)
            }
        };
        Self { shape, data }
    }

    /// Row `index` of the leading axis.
    pub fn row(&self, index: usize) -> Result<Self> {
        let dims = self.shape.dims();
        ensure!(dims.first().is_some_and(|&rows| index < rows), RowOutOfRangeSnafu { index, shape: self.shape.clone() });
        let shape = CanonicalShape::new(self.dtype(), dims[1..].iter().copied());
        let width = shape.numel();
        let data = self.data.slice(index * width..(index + 1) * width);
        Ok(Self { shape, data })
    }

    /// Stack equally shaped literals along a new leading axis.
    pub fn stack(parts: &[Arc<Literal>]) -> Result<Self> {
        let first = parts.first().context(EmptyStackSnafu)?;
        let mut data = first.data.slice(0..0);
        for part in parts {
            ensure!(
                part.shape.dtype() == first.dtype() && part.shape.same_dims(&first.shape),
                StackShapeMismatchSnafu { expected: first.shape.clone(), actual: part.shape.clone() }
            );
            data.extend(&part.data);
        }
        let dims = std::iter::once(parts.len()).chain(first.shape.dims().iter().copied());
        Ok(Self { shape: CanonicalShape::new(first.dtype(), dims), data })
    }

    /// Same elements under new dimensions.
    pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
        let shape = CanonicalShape::new(self.dtype(), dims.iter().copied());
        let output_size = shape.numel();
        ensure!(output_size == self.len(), ReshapeSizeMismatchSnafu { input_size: self.len(), output_size });
        Ok(Self { shape, data: self.data.clone() })
    }
}

/// Gather converted values into the class for `dtype`.
pub(crate) fn collect_class(dtype: DType, values: impl Iterator<Item = ConstValue>) -> Data {
    match dtype {
        DType::Bool => Data::Bool(values.map(|v| v.as_f64() != 0.0).collect()),
        dt if dt.is_signed() => Data::Signed(values.map(|v| v.to_bits() as i64).collect()),
        dt if dt.is_unsigned() => Data::Unsigned(values.map(|v| v.to_bits()).collect()),
        _ => Data::Float(values.map(|v| v.as_f64()).collect()),
    }
}
