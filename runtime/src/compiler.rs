//! Compiler backend boundary.
//!
//! A [`Compiler`] turns a captured graph into a [`CompiledArtifact`]: an
//! [`Executable`] plus the shape signature the scheduler checks inputs
//! against. Compilers are pure functions of their request; caching belongs
//! to [`crate::cache::CompilationCache`].

use std::sync::Arc;

use tardy_device::Literal;
use tardy_dtype::{CanonicalShape, DType};
use tardy_ir::{BinaryOp, CapturedGraph, Fingerprint, Op, Precision, ReduceOp, UnaryOp, shape};
use tracing::debug;

use crate::error::{CompileError, Result};
use crate::program::ReferenceProgram;

/// Runs a compiled graph against host literals.
pub trait Executable: Send + Sync + std::fmt::Debug {
    /// Inputs arrive in parameter order; outputs leave in graph output order.
    fn execute(&self, inputs: &[Arc<Literal>]) -> Result<Vec<Literal>>;
}

/// Compiler backend.
pub trait Compiler: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledArtifact, CompileError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub graph: &'a CapturedGraph,
    pub fingerprint: Fingerprint,
    pub precision: Precision,
}

/// Executable with its signature. Shared by the cache and running dispatches.
#[derive(derive_more::Debug)]
pub struct CompiledArtifact {
    pub fingerprint: Fingerprint,
    pub precision: Precision,
    pub input_shapes: Vec<CanonicalShape>,
    pub output_shapes: Vec<CanonicalShape>,
    /// Name of the compiler that produced it.
    pub compiler: String,
    #[debug(skip)]
    pub executable: Arc<dyn Executable>,
}

impl CompiledArtifact {
    /// Artifact whose signature is taken from the request graph.
    pub fn new(request: &CompileRequest<'_>, compiler: &str, executable: Arc<dyn Executable>) -> Self {
        Self {
            fingerprint: request.fingerprint,
            precision: request.precision,
            input_shapes: request.graph.parameter_shapes(),
            output_shapes: request.graph.output_shapes(),
            compiler: compiler.to_string(),
            executable,
        }
    }
}

/// Compiler for the host reference backend.
///
/// Re-validates every node (operand order, shapes, dtype support) and lowers
/// the graph to an interpreted [`ReferenceProgram`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceCompiler;

impl ReferenceCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for ReferenceCompiler {
    fn name(&self) -> &str {
        "reference"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledArtifact, CompileError> {
        let graph = request.graph;
        if graph.is_empty() {
            return Err(CompileError::EmptyGraph);
        }

        for (index, node) in graph.nodes().iter().enumerate() {
            validate_node(graph, index, node)?;
        }

        let program = ReferenceProgram::lower(graph, request.precision);
        debug!(
            graph.hash = %request.fingerprint.short(),
            program.instructions = program.len(),
            precision = %request.precision,
            "lowered graph to reference program"
        );
        Ok(CompiledArtifact::new(request, self.name(), Arc::new(program)))
    }
}

fn validate_node(graph: &CapturedGraph, index: usize, node: &tardy_ir::Node) -> Result<(), CompileError> {
    let op = node.op();
    let name = op.name();

    let mut operand_shapes = Vec::with_capacity(node.operands().len());
    for operand in node.operands() {
        match graph.position(operand.id) {
            Some(position) if position < index => operand_shapes.push(operand.shape()),
            _ => return Err(CompileError::DanglingOperand { node: index, op: name }),
        }
    }

    if !op.is_leaf() {
        match shape::infer(op, &operand_shapes) {
            Ok(inferred) if inferred == *node.shape() => {}
            Ok(inferred) => {
                return Err(CompileError::ShapeMismatch {
                    node: index,
                    op: name,
                    declared: node.shape().clone(),
                    inferred: inferred.to_string(),
                });
            }
            Err(err) => {
                return Err(CompileError::ShapeMismatch {
                    node: index,
                    op: name,
                    declared: node.shape().clone(),
                    inferred: err.to_string(),
                });
            }
        }
    }

    // Element type of the operands, or of the node for leaves.
    let dtype = operand_shapes.last().map_or(node.dtype(), |s| s.dtype());
    if !supports(op, dtype) {
        let op_name: &'static str = match op {
            Op::Unary(u) => (*u).into(),
            Op::Binary(b) => (*b).into(),
            Op::Reduce { op, .. } => (*op).into(),
            other => other.name(),
        };
        return Err(CompileError::UnsupportedOperation { node: index, op: op_name, dtype });
    }
    Ok(())
}

/// Whether the reference backend has a kernel for `op` over `dtype` operands.
pub fn supports(op: &Op, dtype: DType) -> bool {
    match op {
        Op::Unary(u) if u.is_transcendental() => dtype.is_float(),
        Op::Unary(UnaryOp::Not) => !dtype.is_float(),
        Op::Unary(UnaryOp::Neg | UnaryOp::Abs) => !dtype.is_bool(),
        Op::Binary(b) if b.is_bitwise() => !dtype.is_float(),
        Op::Binary(BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow) => !dtype.is_bool(),
        Op::Dot => !dtype.is_bool(),
        Op::Reduce { op: ReduceOp::Sum | ReduceOp::Prod, .. } => !dtype.is_bool(),
        _ => true,
    }
}
