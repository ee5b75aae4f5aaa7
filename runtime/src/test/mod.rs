
use std::sync::Arc;

use tardy_device::Literal;
use tardy_dtype::{CanonicalShape, DType, DeviceSpec};
use tardy_ir::{CapturedGraph, Fingerprint, GraphBuilder, NodeRef, Precision, fingerprint};

use crate::{CompileError, CompileRequest, CompiledArtifact, Compiler, Executable, ReferenceCompiler, Result};

pub(crate) fn builder() -> GraphBuilder {
    GraphBuilder::new(DeviceSpec::tpu(0))
}

pub(crate) fn shape(dtype: DType, dims: &[usize]) -> CanonicalShape {
    CanonicalShape::new(dtype, dims.iter().copied())
}

pub(crate) fn param(builder: &GraphBuilder, buffer_id: u64, dtype: DType, dims: &[usize]) -> NodeRef {
    builder.device_data(buffer_id, shape(dtype, dims), Arc::new(buffer_id))
}

pub(crate) fn compile(graph: &CapturedGraph, precision: Precision) -> Result<CompiledArtifact, CompileError> {
    let request = CompileRequest { graph, fingerprint: fingerprint(graph, precision), precision };
    ReferenceCompiler.compile(&request)
}

/// Capture `outputs`, compile them and run on `inputs` (parameter order).
pub(crate) fn run(outputs: &[NodeRef], inputs: Vec<Literal>, precision: Precision) -> Result<Vec<Literal>> {
    let graph = CapturedGraph::capture(outputs);
    let artifact = compile(&graph, precision).expect("graph should compile");
    let inputs: Vec<_> = inputs.into_iter().map(Arc::new).collect();
    artifact.executable.execute(&inputs)
}

/// Executable backed by a closure.
pub(crate) struct FnExecutable<F>(pub F);

impl<F> std::fmt::Debug for FnExecutable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnExecutable")
    }
}

impl<F> Executable for FnExecutable<F>
where
    F: Fn(&[Arc<Literal>]) -> Result<Vec<Literal>> + Send + Sync,
{
    fn execute(&self, inputs: &[Arc<Literal>]) -> Result<Vec<Literal>> {
        (self.0)(inputs)
    }
}

/// Hand-built artifact around a closure.
pub(crate) fn stub_artifact<F>(
    tag: u8,
    inputs: Vec<CanonicalShape>,
    outputs: Vec<CanonicalShape>,
    execute: F,
) -> CompiledArtifact
where
    F: Fn(&[Arc<Literal>]) -> Result<Vec<Literal>> + Send + Sync + 'static,
{
    CompiledArtifact {
        fingerprint: Fingerprint([tag; 32]),
        precision: Precision::Default,
        input_shapes: inputs,
        output_shapes: outputs,
        compiler: "stub".into(),
        executable: Arc::new(FnExecutable(execute)),
    }
}

pub(crate) fn artifact<F>(
    tag: u8,
    inputs: Vec<CanonicalShape>,
    outputs: Vec<CanonicalShape>,
    execute: F,
) -> Arc<CompiledArtifact>
where
    F: Fn(&[Arc<Literal>]) -> Result<Vec<Literal>> + Send + Sync + 'static,
{
    Arc::new(stub_artifact(tag, inputs, outputs, execute))
}
