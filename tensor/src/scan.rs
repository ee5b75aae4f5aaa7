//! Loops over the leading axis of device tensors.
//!
//! [`scan`] runs `body(carry, x) -> (carry, y)` once per row of `xs`,
//! threading the carry through and stacking the per-row `y` values. The body
//! is traced a single time against placeholder tensors: its graph is
//! captured, fingerprinted and compiled through the compilation cache, and
//! every iteration dispatches the same artifact with the current carry and
//! row buffers. Rows and stacked outputs are split and joined on the device,
//! so a scan never transfers data to the host.
//!
//! A pure body (the default) is traced once per body type, device, input
//! signature and precision mode and the trace is reused by later scans on
//! the same context. An impure body is traced again on every call.
//!
//! ```ignore
//! let cumsum = scan(
//!     |carry, x| {
//!         let next = carry[0].try_add(&x[0])?;
//!         Ok((vec![next.clone()], vec![next]))
//!     },
//!     &[init],
//!     &[xs],
//! )?;
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use bon::builder;
use parking_lot::Mutex;
use snafu::{ResultExt, ensure};
use tardy_device::{Buffer, Failure};
use tardy_dtype::{CanonicalShape, DeviceSpec};
use tardy_ir::{CapturedGraph, NodeRef, Precision, fingerprint};
use tardy_runtime::CompiledArtifact;
use tracing::debug;

use crate::context::Context;
use crate::error::*;
use crate::tensor::LazyTensor;

/// Final carry and the stacked per-row outputs of a [`scan`].
#[derive(Debug, Clone)]
pub struct Scanned {
    pub carry: Vec<LazyTensor>,
    pub ys: Vec<LazyTensor>,
}

/// Where an input of the traced body comes from on each iteration.
#[derive(Debug, Clone)]
enum BodyInput {
    Carry(usize),
    Row(usize),
    /// Buffer the body closed over or created while tracing.
    Captured(Buffer),
}

/// A body traced and compiled for one input signature.
#[derive(Debug)]
pub(crate) struct TracedBody {
    artifact: Arc<CompiledArtifact>,
    inputs: Vec<BodyInput>,
    carry_outputs: Vec<usize>,
    y_outputs: Vec<usize>,
    y_shapes: Vec<CanonicalShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ScanKey {
    body: TypeId,
    device: DeviceSpec,
    carry: Vec<CanonicalShape>,
    rows: Vec<CanonicalShape>,
    precision: Precision,
}

/// Traces of pure bodies, per context.
#[derive(Debug, Default)]
pub(crate) struct ScanCache {
    bodies: Mutex<HashMap<ScanKey, Arc<TracedBody>>>,
}

impl ScanCache {
    pub(crate) fn len(&self) -> usize {
        self.bodies.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.bodies.lock().clear();
    }
}

type BodyResult = Result<(Vec<LazyTensor>, Vec<LazyTensor>)>;

/// Scan a pure `body` over the leading axis of `xs`.
///
/// See [`scan_with`] for the options.
pub fn scan<F>(body: F, init: &[LazyTensor], xs: &[LazyTensor]) -> Result<Scanned>
where
    F: Fn(&[LazyTensor], &[LazyTensor]) -> BodyResult + 'static,
{
    scan_with(body).init(init).xs(xs).call()
}

/// Scan `body` over the leading axis of `xs`, starting from `init`.
///
/// `body` receives the current carry and one row of every `xs` tensor and
/// returns the next carry (same shapes and dtypes as `init`) and the row's
/// outputs. Set `pure(false)` when the body's graph may differ between calls;
/// it is then traced on every scan.
///
/// # Errors
///
/// - [`Error::ScanLength`] when `xs` is empty, a tensor has no leading axis,
///   or the leading lengths differ or are zero
/// - [`Error::ScanBody`] when the body's outputs do not fit the carry or live
///   on another device
#[builder]
pub fn scan_with<F>(
    #[builder(start_fn)] body: F,
    init: &[LazyTensor],
    xs: &[LazyTensor],
    #[builder(default = true)] pure: bool,
) -> Result<Scanned>
where
    F: Fn(&[LazyTensor], &[LazyTensor]) -> BodyResult + 'static,
{
    let Some(first) = xs.first() else {
        return ScanLengthSnafu { reason: "scan needs at least one xs tensor" }.fail();
    };
    let ctx = Arc::clone(first.context());
    let device = first.device();
    let length = leading_length(xs)?;
    for tensor in init.iter().chain(xs) {
        ensure!(
            tensor.device() == device,
            ScanBodySnafu { reason: format!("inputs span {device} and {}", tensor.device()) }
        );
    }

    let key = ScanKey {
        body: TypeId::of::<F>(),
        device,
        carry: init.iter().map(|t| t.shape().clone()).collect(),
        rows: xs.iter().map(row_shape).collect(),
        precision: ctx.precision(),
    };
    let traced = if pure {
        let cached = ctx.scans().bodies.lock().get(&key).cloned();
        match cached {
            Some(traced) => traced,
            None => {
                let traced = Arc::new(trace(&ctx, &body, &key)?);
                ctx.scans().bodies.lock().entry(key).or_insert(traced).clone()
            }
        }
    } else {
        Arc::new(trace(&ctx, &body, &key)?)
    };

    run(&ctx, &traced, device, init, xs, length)
}

fn leading_length(xs: &[LazyTensor]) -> Result<usize> {
    let mut length = None;
    for x in xs {
        let Some(&rows) = x.dims().first() else {
            return ScanLengthSnafu { reason: format!("tensor {} has no leading axis", x.id()) }.fail();
        };
        match length {
            None => length = Some(rows),
            Some(expected) => ensure!(
                expected == rows,
                ScanLengthSnafu { reason: format!("xs lengths differ: {expected} and {rows}") }
            ),
        }
    }
    match length {
        Some(0) | None => ScanLengthSnafu { reason: "xs have zero rows" }.fail(),
        Some(length) => Ok(length),
    }
}

fn row_shape(x: &LazyTensor) -> CanonicalShape {
    CanonicalShape::new(x.dtype(), x.dims()[1..].iter().copied())
}

/// Failed buffer standing in for a carry or row while the body is traced.
///
/// Reading a placeholder's value inside the body reports the failure.
fn placeholder(ctx: &Arc<Context>, device: DeviceSpec, logical: &CanonicalShape) -> (LazyTensor, Buffer) {
    let stored = logical.with_dtype(device.storage_policy().storage_dtype(logical.dtype()));
    let buffer = Buffer::pending(device, stored);
    buffer.fail(Failure::msg("scan placeholders have no value while the body is traced"));
    (LazyTensor::with_buffer(ctx, buffer.clone(), logical.dtype()), buffer)
}

#[tracing::instrument(skip_all, fields(device = %key.device, scan.carry = key.carry.len(), scan.xs = key.rows.len()))]
fn trace<F>(ctx: &Arc<Context>, body: &F, key: &ScanKey) -> Result<TracedBody>
where
    F: Fn(&[LazyTensor], &[LazyTensor]) -> BodyResult,
{
    let device = key.device;
    let (carry_in, carry_buffers): (Vec<_>, Vec<_>) = key.carry.iter().map(|s| placeholder(ctx, device, s)).unzip();
    let (rows_in, row_buffers): (Vec<_>, Vec<_>) = key.rows.iter().map(|s| placeholder(ctx, device, s)).unzip();

    let (carry_out, ys) = body(&carry_in, &rows_in)?;
    ensure!(
        carry_out.len() == key.carry.len(),
        ScanBodySnafu { reason: format!("body returned {} carry values for {}", carry_out.len(), key.carry.len()) }
    );
    for (i, (out, expected)) in carry_out.iter().zip(&key.carry).enumerate() {
        ensure!(
            out.dtype() == expected.dtype() && out.shape().same_dims(expected),
            ScanBodySnafu { reason: format!("carry {i} changed from {expected} to {}", out.shape()) }
        );
    }
    for out in carry_out.iter().chain(&ys) {
        ensure!(
            out.device() == device,
            ScanBodySnafu { reason: format!("body output lives on {} instead of {device}", out.device()) }
        );
    }

    let carry_nodes: Vec<NodeRef> = carry_out.iter().map(LazyTensor::node).collect();
    let y_nodes: Vec<NodeRef> = ys.iter().map(LazyTensor::node).collect();
    let roots: Vec<NodeRef> = carry_nodes.iter().chain(&y_nodes).cloned().collect();
    ensure!(!roots.is_empty(), ScanBodySnafu { reason: "body returned no values" });

    let graph = CapturedGraph::capture(&roots);
    // Every root is an output; duplicates share one position.
    let output_of = |node: &NodeRef| graph.outputs().iter().position(|o| o.id == node.id).unwrap_or_default();
    let carry_outputs: Vec<usize> = carry_nodes.iter().map(output_of).collect();
    let y_outputs: Vec<usize> = y_nodes.iter().map(output_of).collect();

    let inputs = graph
        .parameters()
        .iter()
        .map(|node| {
            let buffer = node.payload::<Buffer>().ok_or(Error::MissingBuffer { node: node.id })?;
            let position = |buffers: &[Buffer]| buffers.iter().position(|b| b.id() == buffer.id());
            Ok(match (position(&carry_buffers), position(&row_buffers)) {
                (Some(i), _) => BodyInput::Carry(i),
                (_, Some(i)) => BodyInput::Row(i),
                _ => BodyInput::Captured((*buffer).clone()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let fingerprint = fingerprint(&graph, key.precision);
    let config = ctx.config();
    let artifact = ctx.compile(&graph, fingerprint, key.precision, "scan body", &config)?;
    debug!(graph.hash = %fingerprint.short(), graph.inputs = inputs.len(), graph.outputs = roots.len(), "scan body traced");

    let y_shapes = ys.iter().map(|y| y.shape().clone()).collect();
    Ok(TracedBody { artifact, inputs, carry_outputs, y_outputs, y_shapes })
}

fn run(
    ctx: &Arc<Context>,
    traced: &TracedBody,
    device: DeviceSpec,
    init: &[LazyTensor],
    xs: &[LazyTensor],
    length: usize,
) -> Result<Scanned> {
    let config = ctx.config();
    let store = ctx.store();

    let mut carry = init.iter().map(LazyTensor::realize).collect::<Result<Vec<_>>>()?;
    let rows = xs
        .iter()
        .map(|x| store.unstack(&x.realize()?).context(DeviceSnafu))
        .collect::<Result<Vec<_>>>()?;

    let mut ys: Vec<Vec<Buffer>> = vec![Vec::with_capacity(length); traced.y_outputs.len()];
    for step in 0..length {
        let inputs = traced
            .inputs
            .iter()
            .map(|input| match input {
                BodyInput::Carry(i) => carry[*i].clone(),
                BodyInput::Row(i) => rows[*i][step].clone(),
                BodyInput::Captured(buffer) => buffer.clone(),
            })
            .collect();
        let outputs = ctx.dispatch(device, Arc::clone(&traced.artifact), inputs, "scan iteration", &config)?;
        carry = traced.carry_outputs.iter().map(|&o| outputs[o].clone()).collect();
        for (parts, &o) in ys.iter_mut().zip(&traced.y_outputs) {
            parts.push(outputs[o].clone());
        }
    }
    debug!(device = %device, scan.length = length, graph.hash = %traced.artifact.fingerprint.short(), "scan dispatched");

    let carry = carry.into_iter().zip(init).map(|(buffer, t)| LazyTensor::with_buffer(ctx, buffer, t.dtype())).collect();
    let ys = ys
        .iter()
        .zip(&traced.y_shapes)
        .map(|(parts, shape)| {
            let stacked = store.stack(device, parts).context(DeviceSnafu)?;
            Ok(LazyTensor::with_buffer(ctx, stacked, shape.dtype()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Scanned { carry, ys })
}
