//! Text rendering of captured graphs.
//!
//! ```text
//! Graph(device=TPU:0, precision=default, nodes=3, parameters=2, outputs=1)
//!   %0 = f32[2,2] parameter(0)
//!   %1 = f32[2,2] parameter(1)
//!   %2 = f32[2,2] add(%0, %1)
//!   ROOT (%2)
//! Graph Hash: 5d41402abc4b2a76b9719d911017c592...
//! ```

use std::fmt::Write;

use crate::fingerprint::fingerprint;
use crate::graph::CapturedGraph;
use crate::op::Op;
use crate::precision::Precision;

/// Render `graph`, ending with its `Graph Hash:` line.
pub fn dump(graph: &CapturedGraph, precision: Precision) -> String {
    let mut out = String::new();
    let device = graph.outputs().first().map(|n| n.device().to_string()).unwrap_or_else(|| "none".into());
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "Graph(device={device}, precision={precision}, nodes={}, parameters={}, outputs={})",
        graph.nodes().len(),
        graph.parameters().len(),
        graph.outputs().len()
    );

    let mut next_parameter = 0;
    for (i, node) in graph.nodes().iter().enumerate() {
        let operands = node
            .operands()
            .iter()
            .map(|o| graph.position(o.id).map_or_else(|| "%?".to_string(), |p| format!("%{p}")))
            .collect::<Vec<_>>()
            .join(", ");

        let _ = match node.op() {
            Op::DeviceData { .. } => {
                next_parameter += 1;
                writeln!(out, "  %{i} = {} parameter({})", node.shape(), next_parameter - 1)
            }
            Op::Constant(value) => writeln!(out, "  %{i} = {} constant({value})", node.shape()),
            Op::Compare(cmp) => writeln!(out, "  %{i} = {} compare({operands}), direction={cmp}", node.shape()),
            Op::Permute(axes) => {
                writeln!(out, "  %{i} = {} transpose({operands}), dimensions={axes:?}", node.shape())
            }
            Op::Reduce { op, axes } => {
                writeln!(out, "  %{i} = {} reduce({operands}), op={op}, dimensions={axes:?}", node.shape())
            }
            op => writeln!(out, "  %{i} = {} {}({operands})", node.shape(), op.name()),
        };
    }

    let roots = graph
        .outputs()
        .iter()
        .filter_map(|o| graph.position(o.id))
        .map(|p| format!("%{p}"))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "  ROOT ({roots})");
    let _ = writeln!(out, "Graph Hash: {}", fingerprint(graph, precision));
    out
}
