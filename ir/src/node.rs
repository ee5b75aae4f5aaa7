//! IR nodes.
//!
//! A [`Node`] is immutable once built and shared through [`NodeRef`]. Its
//! operands are strong references, so a node keeps its whole input graph
//! alive and cycles cannot form: an operand always exists before the node
//! that uses it.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tardy_dtype::{CanonicalShape, DType, DeviceSpec};

use crate::op::Op;

pub type NodeRef = Arc<Node>;

/// Operand list, inline for up to three operands (`select`).
pub type Operands = SmallVec<[NodeRef; 3]>;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_node_id() -> u64 {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(derive_more::Debug)]
pub struct Node {
    /// Process-unique id. Monotonic, never reused.
    pub id: u64,
    pub(crate) op: Op,
    pub(crate) shape: CanonicalShape,
    pub(crate) device: DeviceSpec,
    #[debug(skip)]
    pub(crate) operands: Operands,
    /// Opaque data attached to device-data leaves (the buffer they stand
    /// for). Not part of structural identity.
    #[debug(skip)]
    pub(crate) payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Node {
    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn shape(&self) -> &CanonicalShape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.shape.dtype()
    }

    pub fn device(&self) -> DeviceSpec {
        self.device
    }

    pub fn operands(&self) -> &[NodeRef] {
        &self.operands
    }

    /// Attached payload of type `T`, if any.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.as_ref()?.clone().downcast::<T>().ok()
    }

    /// Buffer id of a device-data leaf.
    pub fn buffer_id(&self) -> Option<u64> {
        match self.op {
            Op::DeviceData { buffer_id } => Some(buffer_id),
            _ => None,
        }
    }
}

/// Post-order over the graphs rooted at `roots`.
///
/// Every node appears once, after all of its operands. Roots are visited in
/// order and operands left to right, so the result is deterministic for a
/// given structure.
pub fn toposort(roots: &[NodeRef]) -> Vec<NodeRef> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    // (node, operands already pushed)
    let mut stack: Vec<(NodeRef, bool)> = Vec::new();

    for root in roots {
        stack.push((root.clone(), false));
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                if visited.insert(node.id) {
                    order.push(node);
                }
                continue;
            }
            if visited.contains(&node.id) {
                continue;
            }
            stack.push((node.clone(), true));
            for operand in node.operands.iter().rev() {
                if !visited.contains(&operand.id) {
                    stack.push((operand.clone(), false));
                }
            }
        }
    }

    order
}
