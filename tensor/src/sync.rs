//! Synchronization points.
//!
//! Capture the pending graph of a device, fingerprint it under the active
//! precision mode, fetch or compile its artifact, and dispatch it against the
//! input buffers. The handles that were pending are materialized to the
//! output buffers right away; those buffers stay pending until the device
//! worker finishes. When compilation or dispatch fails, the handles are
//! materialized to failed buffers carrying the same cause, so later reads
//! re-raise the original diagnostic.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use snafu::ResultExt;
use tardy_device::{Buffer, Failure};
use tardy_dtype::DeviceSpec;
use tardy_ir::{CapturedGraph, Fingerprint, LiveRoot, NodeRef, Precision, fingerprint};
use tardy_runtime::debug::{log_compiled, log_sync, record_compilation, record_execution, save_graph};
use tardy_runtime::{CompileRequest, CompiledArtifact, RuntimeConfig};
use tardy_runtime::error::CompilationSnafu;
use tardy_runtime::metrics::metrics;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::*;
use crate::tensor::{LazyTensor, TensorCell};

impl Context {
    /// Materialize every pending tensor recorded on `device` and wait for the results.
    #[tracing::instrument(skip_all, fields(device = %device, sync.cause = cause))]
    pub fn sync(&self, device: DeviceSpec, cause: &str) -> Result<()> {
        let Some(graph) = self.existing_graph(device) else { return Ok(()) };
        let roots = graph.builder.live_roots();
        let tensors = graph.pending();
        let buffers = self.launch(device, roots, &tensors, cause)?;
        self.scheduler().synchronize(&buffers).context(RuntimeSnafu)
    }

    /// [`Self::sync`] for every device, reporting the first failure.
    pub fn sync_all(&self, cause: &str) -> Result<()> {
        let mut first = None;
        for device in self.devices() {
            if let Err(err) = self.sync(device, cause) {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Materialize `tensors` and wait until their buffers are settled.
    #[tracing::instrument(skip_all, fields(sync.tensors = tensors.len(), sync.cause = cause))]
    pub fn sync_tensors(&self, tensors: &[LazyTensor], cause: &str) -> Result<()> {
        let buffers = self.schedule_tensors(tensors, cause)?;
        self.scheduler().synchronize(&buffers).context(RuntimeSnafu)
    }

    /// Dispatch the pending work behind `tensors` without waiting.
    ///
    /// Returns the buffers now backing `tensors`, in order.
    pub fn schedule_tensors(&self, tensors: &[LazyTensor], cause: &str) -> Result<Vec<Buffer>> {
        let mut by_device: BTreeMap<DeviceSpec, Vec<Arc<TensorCell>>> = BTreeMap::new();
        for tensor in tensors {
            if tensor.cell.pending_node().is_some() {
                by_device.entry(tensor.device()).or_default().push(Arc::clone(&tensor.cell));
            }
        }

        for (device, cells) in by_device {
            let mut seen = HashSet::new();
            let roots: Vec<NodeRef> =
                cells.iter().filter_map(|cell| cell.pending_node()).filter(|node| seen.insert(node.id)).collect();
            self.launch(device, roots, &cells, cause)?;
        }

        tensors.iter().map(|t| t.buffer().ok_or(Error::NotMaterialized { tensor: t.id() })).collect()
    }

    /// Capture, compile and dispatch the graph of `roots`, then bind `tensors`
    /// to the outputs.
    fn launch(&self, device: DeviceSpec, roots: Vec<NodeRef>, tensors: &[Arc<TensorCell>], cause: &str) -> Result<Vec<Buffer>> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }
        let config = self.config();
        let precision = self.precision();

        metrics().syncs.inc();
        log_sync(cause, roots.len(), config.debug);

        let graph = CapturedGraph::capture(&roots);
        metrics().graphs_captured.inc();
        let fingerprint = fingerprint(&graph, precision);
        debug!(graph.hash = %fingerprint.short(), graph.nodes = graph.nodes().len(), precision = %precision, "graph captured");

        if let Some(path) = &config.save_graphs
            && let Err(err) = save_graph(path, &graph, precision, cause)
        {
            warn!(error = %err, "graph dump skipped");
        }

        match self.compile_and_dispatch(device, &graph, fingerprint, precision, cause, &config) {
            Ok(outputs) => {
                bind(&graph, &outputs, tensors);
                Ok(outputs)
            }
            Err(err) => {
                warn!(graph.hash = %fingerprint.short(), error = %err, "synchronization failed");
                let failure = Failure::new(err);
                let outputs: Vec<Buffer> = graph
                    .output_shapes()
                    .into_iter()
                    .map(|shape| {
                        let buffer = self.store().allocate(device, shape);
                        buffer.fail(failure.clone());
                        buffer
                    })
                    .collect();
                bind(&graph, &outputs, tensors);
                Err(Error::Failed { source: failure })
            }
        }
    }

    fn compile_and_dispatch(
        &self,
        device: DeviceSpec,
        graph: &CapturedGraph,
        fingerprint: Fingerprint,
        precision: Precision,
        cause: &str,
        config: &RuntimeConfig,
    ) -> Result<Vec<Buffer>> {
        let artifact = self.compile(graph, fingerprint, precision, cause, config)?;
        let inputs = graph
            .parameters()
            .iter()
            .map(|node| node.payload::<Buffer>().map(|b| (*b).clone()).ok_or(Error::MissingBuffer { node: node.id }))
            .collect::<Result<Vec<_>>>()?;
        self.dispatch(device, artifact, inputs, cause, config)
    }

    /// Artifact for `graph`, compiled on a cache miss.
    ///
    /// Only an actual compile is logged and recorded in the debug file.
    pub(crate) fn compile(
        &self,
        graph: &CapturedGraph,
        fingerprint: Fingerprint,
        precision: Precision,
        cause: &str,
        config: &RuntimeConfig,
    ) -> Result<Arc<CompiledArtifact>> {
        let request = CompileRequest { graph, fingerprint, precision };
        let mut compiled = false;
        let artifact = self
            .cache()
            .get_or_compile(fingerprint, || {
                compiled = true;
                self.compiler().compile(&request)
            })
            .context(CompilationSnafu { fingerprint: fingerprint.short() })
            .context(RuntimeSnafu)?;

        if compiled {
            log_compiled(&artifact, fingerprint, config.debug);
            if let Some(path) = &config.debug_file
                && let Err(err) = record_compilation(path, &artifact, cause)
            {
                warn!(error = %err, "compilation record skipped");
            }
        }
        Ok(artifact)
    }

    /// Queue one execution of `artifact` on `device`.
    pub(crate) fn dispatch(
        &self,
        device: DeviceSpec,
        artifact: Arc<CompiledArtifact>,
        inputs: Vec<Buffer>,
        cause: &str,
        config: &RuntimeConfig,
    ) -> Result<Vec<Buffer>> {
        if let Some(path) = &config.debug_file
            && let Err(err) = record_execution(path, &artifact, cause)
        {
            warn!(error = %err, "execution record skipped");
        }
        self.scheduler().dispatch(device, artifact, inputs).context(RuntimeSnafu)
    }
}

/// Point each handle still waiting on a graph output at its buffer.
fn bind(graph: &CapturedGraph, outputs: &[Buffer], tensors: &[Arc<TensorCell>]) {
    for cell in tensors {
        let Some(node) = cell.pending_node() else { continue };
        if let Some(position) = graph.outputs().iter().position(|o| o.id == node.id) {
            cell.materialize(node.id, &outputs[position]);
        }
    }
}
