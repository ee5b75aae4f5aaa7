//! Per-device graph builder.
//!
//! The builder records operations as IR nodes, validating each one before it
//! enters the graph, and tracks the *live roots*: outstanding tensor handles
//! whose values are still pending. A synchronization point asks the builder
//! for its live roots and captures the graph they reach.
//!
//! # Hash consing
//!
//! Structurally identical nodes (same kind and attributes, shape and operand
//! identities) recorded on one builder share one allocation. The table holds
//! `Weak<Node>` so it never keeps a node alive. Dead entries are swept by
//! [`GraphBuilder::gc_dead_nodes`], which recording triggers whenever the
//! table has doubled since the last sweep.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use papaya::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use snafu::ensure;
use tardy_dtype::{CanonicalShape, DeviceSpec};
use tracing::trace;

use crate::error::*;
use crate::node::{Node, NodeRef, Operands, next_node_id};
use crate::op::Op;
use crate::shape;
use crate::types::ConstValue;

/// Something whose value is still an unevaluated node.
///
/// Tensor handles implement this; the builder holds them weakly.
pub trait LiveRoot: Send + Sync {
    /// Pending node, or `None` once the value is materialized.
    fn pending_node(&self) -> Option<NodeRef>;
}

/// Cache key for hash consing.
///
/// Operands are keyed by their stable ids, which are never reused, so a dead
/// operand cannot alias a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    op: Op,
    shape: CanonicalShape,
    operand_ids: SmallVec<[u64; 3]>,
}

/// Table size below which recording never sweeps.
const MIN_SWEEP_ENTRIES: usize = 1024;

/// Registered handles, pruned once the list doubled since the last prune.
struct RootSet {
    entries: Vec<Weak<dyn LiveRoot>>,
    prune_at: usize,
}

pub struct GraphBuilder {
    device: DeviceSpec,
    nodes: HashMap<NodeKey, Weak<Node>>,
    sweep_at: AtomicUsize,
    roots: Mutex<RootSet>,
}

impl GraphBuilder {
    pub fn new(device: DeviceSpec) -> Self {
        Self {
            device,
            nodes: HashMap::new(),
            sweep_at: AtomicUsize::new(MIN_SWEEP_ENTRIES),
            roots: Mutex::new(RootSet { entries: Vec::new(), prune_at: MIN_SWEEP_ENTRIES }),
        }
    }

    pub fn device(&self) -> DeviceSpec {
        self.device
    }

    /// Record `op` over `operands` with the caller's expected `shape`.
    ///
    /// Fails, without touching the graph, when the arity, operand dtypes or
    /// dimensions are invalid for the kind or when `shape` disagrees with the
    /// inferred result.
    pub fn record_operation(&self, op: Op, operands: &[NodeRef], shape: CanonicalShape) -> Result<NodeRef> {
        let inferred = self.infer(&op, operands)?;
        ensure!(
            inferred == shape,
            ShapeDisagreementSnafu { op: op.name(), requested: shape, inferred }
        );
        Ok(self.intern(op, operands.iter().cloned().collect(), inferred, None))
    }

    /// Record `op` with its inferred shape.
    pub fn record_inferred(&self, op: Op, operands: &[NodeRef]) -> Result<NodeRef> {
        let inferred = self.infer(&op, operands)?;
        Ok(self.intern(op, operands.iter().cloned().collect(), inferred, None))
    }

    /// Leaf for an existing device buffer.
    ///
    /// `payload` is attached to the node so capture can find the buffer again;
    /// only `buffer_id` takes part in structural identity.
    pub fn device_data(&self, buffer_id: u64, shape: CanonicalShape, payload: Arc<dyn Any + Send + Sync>) -> NodeRef {
        self.intern(Op::DeviceData { buffer_id }, Operands::new(), shape, Some(payload))
    }

    /// Leaf filled with `value`, converted to the dtype of `shape`.
    pub fn constant(&self, value: ConstValue, shape: CanonicalShape) -> NodeRef {
        let value = value.cast(shape.dtype());
        self.intern(Op::Constant(value), Operands::new(), shape, None)
    }

    fn infer(&self, op: &Op, operands: &[NodeRef]) -> Result<CanonicalShape> {
        for operand in operands {
            ensure!(operand.device == self.device, DeviceMismatchSnafu { builder: self.device, operand: operand.device });
        }
        let shapes: SmallVec<[&CanonicalShape; 3]> = operands.iter().map(|n| &n.shape).collect();
        shape::infer(op, &shapes)
    }

    fn intern(
        &self,
        op: Op,
        operands: Operands,
        shape: CanonicalShape,
        payload: Option<Arc<dyn Any + Send + Sync>>,
    ) -> NodeRef {
        use papaya::{Compute, Operation};

        let key = NodeKey { op: op.clone(), shape: shape.clone(), operand_ids: operands.iter().map(|n| n.id).collect() };
        let guard = self.nodes.guard();

        if let Some(weak) = self.nodes.get(&key, &guard)
            && let Some(node) = weak.upgrade()
        {
            return node;
        }

        let node = Arc::new(Node { id: next_node_id(), op, shape, device: self.device, operands, payload });
        let weak = Arc::downgrade(&node);

        // Someone else may have inserted a live node for this key meanwhile.
        let result = self.nodes.compute(
            key,
            |entry| match entry {
                Some((_, existing)) => match existing.upgrade() {
                    Some(existing) => Operation::Abort(existing),
                    None => Operation::Insert(weak.clone()),
                },
                None => Operation::Insert(weak.clone()),
            },
            &guard,
        );

        match result {
            Compute::Aborted(existing) => existing,
            _ => {
                trace!(node.id = node.id, op = node.op.name(), shape = %node.shape, "recorded node");
                self.maybe_sweep();
                node
            }
        }
    }

    fn maybe_sweep(&self) {
        if self.nodes.len() < self.sweep_at.load(Ordering::Relaxed) {
            return;
        }
        let removed = self.gc_dead_nodes();
        let remaining = self.nodes.len();
        self.sweep_at.store((remaining * 2).max(MIN_SWEEP_ENTRIES), Ordering::Relaxed);
        trace!(device = %self.device, table.removed = removed, table.entries = remaining, "swept hash-consing table");
    }

    /// Drop table entries whose node is gone. Returns how many were removed.
    pub fn gc_dead_nodes(&self) -> usize {
        let guard = self.nodes.guard();
        let dead: Vec<NodeKey> =
            self.nodes.iter(&guard).filter(|(_, weak)| weak.strong_count() == 0).map(|(k, _)| k.clone()).collect();
        for key in &dead {
            self.nodes.remove(key, &guard);
        }
        dead.len()
    }

    /// Entries in the hash-consing table, dead ones included.
    pub fn table_len(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes in the table that are still alive.
    pub fn live_node_count(&self) -> usize {
        let guard = self.nodes.guard();
        self.nodes.iter(&guard).filter(|(_, weak)| weak.strong_count() > 0).count()
    }

    /// Track a handle as a potential root of the next capture.
    pub fn register_root(&self, root: Weak<dyn LiveRoot>) {
        let mut roots = self.roots.lock();
        if roots.entries.len() >= roots.prune_at {
            roots.entries.retain(|weak| weak.strong_count() > 0);
            roots.prune_at = (roots.entries.len() * 2).max(MIN_SWEEP_ENTRIES);
        }
        roots.entries.push(root);
    }

    /// Pending nodes of every live handle, in registration order.
    ///
    /// Dropped handles and handles that have since materialized are pruned.
    /// A node shared by several handles is returned once.
    pub fn live_roots(&self) -> Vec<NodeRef> {
        let mut roots = self.roots.lock();
        let mut seen = std::collections::HashSet::new();
        let mut nodes = Vec::new();

        roots.entries.retain(|weak| {
            let Some(root) = weak.upgrade() else { return false };
            let Some(node) = root.pending_node() else { return false };
            if seen.insert(node.id) {
                nodes.push(node);
            }
            true
        });

        nodes
    }

    /// Registered handle slots, dropped handles included.
    pub fn root_slots(&self) -> usize {
        self.roots.lock().entries.len()
    }

    /// Number of registered handles still alive (materialized or not).
    pub fn registered_root_count(&self) -> usize {
        let mut roots = self.roots.lock();
        roots.entries.retain(|weak| weak.strong_count() > 0);
        roots.entries.len()
    }
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder").field("device", &self.device).finish_non_exhaustive()
    }
}
