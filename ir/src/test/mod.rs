
use std::sync::Arc;

use tardy_dtype::{CanonicalShape, DType, DeviceSpec};

use crate::{GraphBuilder, NodeRef};

pub(crate) fn builder() -> GraphBuilder {
    GraphBuilder::new(DeviceSpec::tpu(0))
}

pub(crate) fn f32_shape(dims: &[usize]) -> CanonicalShape {
    CanonicalShape::new(DType::Float32, dims.iter().copied())
}

/// Device-data leaf whose payload is its own buffer id.
pub(crate) fn param(builder: &GraphBuilder, buffer_id: u64, dims: &[usize]) -> NodeRef {
    builder.device_data(buffer_id, f32_shape(dims), Arc::new(buffer_id))
}
