//! Lazy tensor handles.
//!
//! A [`LazyTensor`] is a shared handle to one value that is either still an
//! IR node (`Unmaterialized`) or held in a device buffer (`Materialized`).
//! Operations never execute; they record a node and return a new
//! unmaterialized handle. A synchronization point evaluates the pending
//! handles and swaps their state to the produced buffers. Clones share the
//! state, so every clone observes the materialization.
//!
//! The handle reports the logical dtype. Nodes and buffers carry the
//! device's storage dtype, so on a reduced-storage device an `f64` tensor is
//! recorded and computed as `f32` and widened again when read back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use snafu::ResultExt;
use tardy_device::{Buffer, Element, Literal};
use tardy_dtype::{CanonicalShape, DType, DeviceSpec};
use tardy_ir::{LiveRoot, NodeRef, Op};
use tracing::trace;

use crate::context::Context;
use crate::error::*;

static TENSOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_tensor_id() -> u64 {
    TENSOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone)]
pub enum TensorState {
    Unmaterialized(NodeRef),
    Materialized(Buffer),
}

#[derive(Debug)]
pub struct TensorCell {
    pub(crate) id: u64,
    device: DeviceSpec,
    shape: CanonicalShape,
    state: RwLock<TensorState>,
}

impl TensorCell {
    /// Swap to `buffer` if the handle still waits for `node_id`.
    pub(crate) fn materialize(&self, node_id: u64, buffer: &Buffer) -> bool {
        let mut state = self.state.write();
        match &*state {
            TensorState::Unmaterialized(node) if node.id == node_id => {
                *state = TensorState::Materialized(buffer.clone());
                trace!(tensor.id = self.id, buffer.id = buffer.id(), "tensor materialized");
                true
            }
            _ => false,
        }
    }
}

impl LiveRoot for TensorCell {
    fn pending_node(&self) -> Option<NodeRef> {
        match &*self.state.read() {
            TensorState::Unmaterialized(node) => Some(node.clone()),
            TensorState::Materialized(_) => None,
        }
    }
}

#[derive(Clone, derive_more::Debug)]
pub struct LazyTensor {
    pub(crate) cell: Arc<TensorCell>,
    #[debug(skip)]
    pub(crate) ctx: Arc<Context>,
}

impl LazyTensor {
    fn with_state(ctx: &Arc<Context>, device: DeviceSpec, shape: CanonicalShape, state: TensorState) -> Self {
        let cell = Arc::new(TensorCell { id: next_tensor_id(), device, shape, state: RwLock::new(state) });
        Self { cell, ctx: Arc::clone(ctx) }
    }

    /// Handle for a recorded node reporting `logical`, registered as a live
    /// root of its device.
    pub(crate) fn pending(ctx: &Arc<Context>, node: NodeRef, logical: DType) -> Self {
        let shape = node.shape().with_dtype(logical);
        let tensor = Self::with_state(ctx, node.device(), shape, TensorState::Unmaterialized(node));
        ctx.device_graph(tensor.device()).register(&tensor.cell);
        tensor
    }

    /// Handle for an existing buffer, reporting the buffer's dtype.
    pub fn materialized(ctx: &Arc<Context>, buffer: Buffer) -> Self {
        let logical = buffer.shape().dtype();
        Self::with_buffer(ctx, buffer, logical)
    }

    /// Handle for a buffer held in the storage dtype of `logical`.
    pub(crate) fn with_buffer(ctx: &Arc<Context>, buffer: Buffer, logical: DType) -> Self {
        let shape = buffer.shape().with_dtype(logical);
        Self::with_state(ctx, buffer.device(), shape, TensorState::Materialized(buffer))
    }

    /// Upload `values` to `device` through the process-wide context.
    pub fn from_slice<T: Element>(device: DeviceSpec, dims: &[usize], values: &[T]) -> Result<Self> {
        Context::global().from_slice(device, dims, values)
    }

    pub fn id(&self) -> u64 {
        self.cell.id
    }

    pub fn device(&self) -> DeviceSpec {
        self.cell.device
    }

    pub fn shape(&self) -> &CanonicalShape {
        &self.cell.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.cell.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.cell.shape.rank()
    }

    pub fn dtype(&self) -> DType {
        self.cell.shape.dtype()
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn state(&self) -> TensorState {
        self.cell.state.read().clone()
    }

    pub fn is_materialized(&self) -> bool {
        matches!(*self.cell.state.read(), TensorState::Materialized(_))
    }

    /// Backing buffer, once materialized. It may still be pending on the device.
    pub fn buffer(&self) -> Option<Buffer> {
        match &*self.cell.state.read() {
            TensorState::Materialized(buffer) => Some(buffer.clone()),
            TensorState::Unmaterialized(_) => None,
        }
    }

    /// Whether both handles share one state.
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Node standing for this value in new operations: the pending node, or
    /// a device-data leaf for the buffer.
    pub(crate) fn node(&self) -> NodeRef {
        match &*self.cell.state.read() {
            TensorState::Unmaterialized(node) => node.clone(),
            TensorState::Materialized(buffer) => self.ctx.device_graph(self.device()).builder.device_data(
                buffer.id(),
                buffer.shape().clone(),
                Arc::new(buffer.clone()),
            ),
        }
    }

    /// Record `op` over `operands` (this tensor first) on this tensor's device.
    pub(crate) fn record(&self, op: Op, operands: &[&LazyTensor]) -> Result<LazyTensor> {
        let logical = match &op {
            Op::Compare(_) => DType::Bool,
            Op::Cast(dtype) => *dtype,
            Op::Select => operands.get(1).map_or(self.dtype(), |t| t.dtype()),
            _ => self.dtype(),
        };
        let op = match op {
            Op::Cast(dtype) => Op::Cast(self.device().storage_policy().storage_dtype(dtype)),
            op => op,
        };
        let nodes: Vec<NodeRef> = operands.iter().map(|t| t.node()).collect();
        let node = self.ctx.device_graph(self.device()).builder.record_inferred(op, &nodes).context(GraphSnafu)?;
        Ok(Self::pending(&self.ctx, node, logical))
    }

    /// Evaluate this tensor if needed and wait for its buffer.
    pub fn realize(&self) -> Result<Buffer> {
        if let Some(buffer) = self.buffer() {
            return Ok(buffer);
        }
        self.ctx.sync_tensors(std::slice::from_ref(self), "realize")?;
        self.buffer().ok_or(Error::NotMaterialized { tensor: self.id() })
    }

    /// Read the value back. Synchronizes first if the tensor is pending.
    pub fn to_literal(&self) -> Result<Arc<Literal>> {
        let buffer = match self.buffer() {
            Some(buffer) => buffer,
            None => {
                self.ctx.sync_tensors(std::slice::from_ref(self), "value read")?;
                self.buffer().ok_or(Error::NotMaterialized { tensor: self.id() })?
            }
        };
        let literal = self.ctx.scheduler().read(&buffer).context(RuntimeSnafu)?;
        if literal.dtype() == self.dtype() {
            return Ok(literal);
        }
        Ok(Arc::new(literal.cast(self.dtype())))
    }

    /// Elements as `T`, which must be the tensor's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.to_literal()?.to_vec::<T>().context(DeviceSnafu)
    }

    /// Elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(self.to_literal()?.to_f64_vec())
    }
}
