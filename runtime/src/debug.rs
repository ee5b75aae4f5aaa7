//! Debug output: graph dumps, sync logging and the debug file.
//!
//! The debug file receives one compilation record per actual compile,
//! followed by its post-compilation analysis, and one execution record per
//! dispatch. Both records name the graph hash, so an execution can be traced
//! back to the compile that produced its artifact.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use snafu::ResultExt;
use tardy_dtype::CanonicalShape;
use tardy_ir::{CapturedGraph, Fingerprint, Precision, print};
use tracing::{debug, info};

use crate::compiler::CompiledArtifact;
use crate::error::{GraphDumpSnafu, Result};

static DUMP_LOCK: Mutex<()> = Mutex::new(());

const RULE: &str = "================================================================================";
const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

fn append(path: &Path, text: &str) -> Result<()> {
    let _lock = DUMP_LOCK.lock();
    let mut file = OpenOptions::new().create(true).append(true).open(path).context(GraphDumpSnafu { path })?;
    file.write_all(text.as_bytes()).context(GraphDumpSnafu { path })
}

fn gigabytes(shapes: &[CanonicalShape]) -> f64 {
    shapes.iter().map(CanonicalShape::size_bytes).sum::<usize>() as f64 / BYTES_PER_GB
}

fn graph_record(stage: &str, cause: &str, artifact: &CompiledArtifact) -> String {
    let mut text = String::new();
    let mut line = |body: &str| {
        text.push_str(stage);
        text.push_str(" Analysis: ");
        text.push_str(body);
        text.push('\n');
    };
    line(RULE);
    line(&format!("{stage} Cause"));
    line(&format!("  {cause}"));
    line("Graph Info:");
    line(&format!("  Graph Hash: {}", artifact.fingerprint));
    line(&format!("  Number of Graph Inputs: {}", artifact.input_shapes.len()));
    line(&format!("  Number of Graph Outputs: {}", artifact.output_shapes.len()));
    line(RULE);
    text
}

/// Append the compilation record and post-compilation analysis of a freshly
/// compiled `artifact`.
pub fn record_compilation(path: &Path, artifact: &CompiledArtifact, cause: &str) -> Result<()> {
    let mut text = graph_record("Compilation", cause, artifact);
    let post = [
        RULE.to_string(),
        format!("Graph input size: {:.6} GB", gigabytes(&artifact.input_shapes)),
        format!("Graph output size: {:.6} GB", gigabytes(&artifact.output_shapes)),
        format!("Graph Hash: {}", artifact.fingerprint),
        format!("Compiler: {}", artifact.compiler),
        RULE.to_string(),
    ];
    for body in post {
        text.push_str("Post Compilation Analysis: ");
        text.push_str(&body);
        text.push('\n');
    }
    append(path, &text)
}

/// Append the execution record of one dispatch of `artifact`.
pub fn record_execution(path: &Path, artifact: &CompiledArtifact, cause: &str) -> Result<()> {
    append(path, &graph_record("Execution", cause, artifact))
}

/// Append the text dump of `graph` to `path`.
///
/// Dumps from concurrent syncs never interleave.
pub fn save_graph(path: &Path, graph: &CapturedGraph, precision: Precision, cause: &str) -> Result<()> {
    let text = print::dump(graph, precision);
    append(path, &format!("[ScheduleSyncTensorsGraph] cause={cause}\n{text}\n"))
}

pub fn log_sync(cause: &str, roots: usize, verbose: bool) {
    if verbose {
        info!(sync.cause = cause, sync.roots = roots, "synchronizing tensors");
    } else {
        debug!(sync.cause = cause, sync.roots = roots, "synchronizing tensors");
    }
}

pub fn log_compiled(artifact: &CompiledArtifact, fingerprint: Fingerprint, verbose: bool) {
    let (inputs, outputs) = (artifact.input_shapes.len(), artifact.output_shapes.len());
    if verbose {
        info!(graph.hash = %fingerprint, graph.inputs = inputs, graph.outputs = outputs, "post compilation analysis");
    } else {
        debug!(graph.hash = %fingerprint.short(), graph.inputs = inputs, graph.outputs = outputs, "graph compiled");
    }
}
