//! Interpreted programs of the reference backend.

use std::sync::Arc;

use smallvec::SmallVec;
use snafu::{ResultExt, ensure};
use tardy_device::Literal;
use tardy_dtype::CanonicalShape;
use tardy_ir::{CapturedGraph, Op, Precision};

use crate::compiler::Executable;
use crate::error::{ExecutionSnafu, InputCountSnafu, KernelError, NoKernelSnafu, Result};
use crate::kernel;

#[derive(Debug, Clone)]
struct Instruction {
    op: Op,
    shape: CanonicalShape,
    /// Positions of earlier instructions.
    operands: SmallVec<[usize; 3]>,
}

/// A captured graph flattened into post-order instructions.
///
/// Instruction `i` only reads instructions `< i`; device-data instructions
/// read the next input.
#[derive(Debug, Clone)]
pub struct ReferenceProgram {
    instructions: Vec<Instruction>,
    parameters: usize,
    outputs: Vec<usize>,
    precision: Precision,
}

impl ReferenceProgram {
    /// Flatten a validated graph.
    pub(crate) fn lower(graph: &CapturedGraph, precision: Precision) -> Self {
        let instructions = graph
            .nodes()
            .iter()
            .map(|node| Instruction {
                op: node.op().clone(),
                shape: node.shape().clone(),
                operands: node.operands().iter().filter_map(|o| graph.position(o.id)).collect(),
            })
            .collect();
        let outputs = graph.outputs().iter().filter_map(|o| graph.position(o.id)).collect();
        Self { instructions, parameters: graph.parameters().len(), outputs, precision }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    fn run(&self, instruction: &Instruction, values: &[Arc<Literal>]) -> Result<Literal, KernelError> {
        let arg = |i: usize| values[instruction.operands[i]].as_ref();
        let shape = &instruction.shape;
        match &instruction.op {
            Op::Constant(value) => Ok(kernel::constant(*value, shape)),
            Op::Unary(op) => kernel::unary(*op, arg(0), shape),
            Op::Binary(op) => kernel::binary(*op, arg(0), arg(1), shape),
            Op::Compare(op) => kernel::compare(*op, arg(0), arg(1), shape),
            Op::Select => kernel::select(arg(0), arg(1), arg(2), shape),
            Op::Dot => kernel::dot(arg(0), arg(1), shape, self.precision),
            Op::Cast(_) => kernel::cast(arg(0), shape),
            Op::Reshape(_) => kernel::reshape(arg(0), shape),
            Op::Broadcast(_) => kernel::broadcast(arg(0), shape),
            Op::Permute(axes) => kernel::permute(arg(0), axes, shape),
            Op::Reduce { op, axes } => kernel::reduce(*op, axes, arg(0), shape),
            Op::DeviceData { .. } => NoKernelSnafu { op: "parameter", class: "device" }.fail(),
        }
    }
}

impl Executable for ReferenceProgram {
    fn execute(&self, inputs: &[Arc<Literal>]) -> Result<Vec<Literal>> {
        ensure!(inputs.len() == self.parameters, InputCountSnafu { expected: self.parameters, actual: inputs.len() });

        let mut bound = inputs.iter();
        let mut values: Vec<Arc<Literal>> = Vec::with_capacity(self.instructions.len());
        for (node, instruction) in self.instructions.iter().enumerate() {
            let value = match &instruction.op {
                Op::DeviceData { .. } => match bound.next() {
                    Some(input) => Arc::clone(input),
                    None => return InputCountSnafu { expected: self.parameters, actual: inputs.len() }.fail(),
                },
                op => Arc::new(self.run(instruction, &values).context(ExecutionSnafu { node, op: op.name() })?),
            };
            values.push(value);
        }

        Ok(self.outputs.iter().map(|&o| values[o].as_ref().clone()).collect())
    }
}
