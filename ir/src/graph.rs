//! Closed subgraphs captured at a synchronization point.

use std::collections::HashMap;

use tardy_dtype::CanonicalShape;

use crate::node::{NodeRef, toposort};
use crate::op::Op;

/// The graph reachable from a set of output nodes.
///
/// `nodes` is a post-order (operands before users). Device-data leaves are
/// the graph's *parameters*, numbered by first occurrence in that order.
#[derive(Debug, Clone)]
pub struct CapturedGraph {
    nodes: Vec<NodeRef>,
    parameters: Vec<NodeRef>,
    outputs: Vec<NodeRef>,
    index: HashMap<u64, usize>,
}

impl CapturedGraph {
    /// Capture everything reachable from `outputs`.
    ///
    /// Duplicate outputs are kept once, in first-occurrence order.
    pub fn capture(outputs: &[NodeRef]) -> Self {
        let mut seen = std::collections::HashSet::new();
        let outputs: Vec<NodeRef> = outputs.iter().filter(|n| seen.insert(n.id)).cloned().collect();

        let nodes = toposort(&outputs);
        let index = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        let parameters = nodes.iter().filter(|n| matches!(n.op, Op::DeviceData { .. })).cloned().collect();

        Self { nodes, parameters, outputs, index }
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn parameters(&self) -> &[NodeRef] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[NodeRef] {
        &self.outputs
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Position of a node in [`Self::nodes`].
    pub fn position(&self, node_id: u64) -> Option<usize> {
        self.index.get(&node_id).copied()
    }

    /// Parameter number of a device-data leaf.
    pub fn parameter_position(&self, node_id: u64) -> Option<usize> {
        self.parameters.iter().position(|p| p.id == node_id)
    }

    pub fn parameter_shapes(&self) -> Vec<CanonicalShape> {
        self.parameters.iter().map(|n| n.shape.clone()).collect()
    }

    pub fn output_shapes(&self) -> Vec<CanonicalShape> {
        self.outputs.iter().map(|n| n.shape.clone()).collect()
    }

    /// Whether any node is precision sensitive.
    pub fn uses_precision(&self) -> bool {
        self.nodes.iter().any(|n| n.op.is_precision_sensitive())
    }
}
