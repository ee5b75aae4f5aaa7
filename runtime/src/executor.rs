//! Per-device asynchronous execution.
//!
//! Every logical device gets a FIFO queue served by one worker thread and a
//! [`CpuTimelineSignal`]. Submissions are numbered `1, 2, 3, ...` per device;
//! the worker advances the signal after each one settles, so waiting for a
//! device means waiting for its last submission number.
//!
//! ```text
//! dispatch ──▶ [queue: job₁ job₂ ...] ──▶ worker ──▶ wait inputs ──▶ execute ──▶ complete/fail outputs ──▶ signal.set(n)
//! ```
//!
//! Same-device dispatches run in submission order. Cross-device ordering
//! exists only through buffer dependencies and collectives.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use snafu::ResultExt;
use tardy_device::{Buffer, CpuTimelineSignal, DeviceDataStore, Failure, Literal, TimelineSignal};
use tardy_dtype::DeviceSpec;
use tracing::{debug, trace, warn};

use crate::compiler::CompiledArtifact;
use crate::error::{DeviceSnafu, DispatchSnafu, QueueClosedSnafu, Result};
use crate::metrics::metrics;

/// Lifecycle of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum ExecutionState {
    Idle = 0,
    Dispatched = 1,
    Completed = 2,
    Failed = 3,
}

/// Shared view of a dispatch's progress.
#[derive(Debug, Clone)]
pub struct DispatchStatus(Arc<std::sync::atomic::AtomicU8>);

impl DispatchStatus {
    fn new() -> Self {
        Self(Arc::new(std::sync::atomic::AtomicU8::new(ExecutionState::Idle as u8)))
    }

    fn set(&self, state: ExecutionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> ExecutionState {
        ExecutionState::from_repr(self.0.load(Ordering::Acquire)).unwrap_or(ExecutionState::Idle)
    }
}

/// Result of [`Scheduler::submit`].
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub device: DeviceSpec,
    /// Position of this dispatch on the device timeline.
    pub ticket: u64,
    pub outputs: Vec<Buffer>,
    pub status: DispatchStatus,
}

struct Job {
    ticket: u64,
    artifact: Arc<CompiledArtifact>,
    inputs: Vec<Buffer>,
    outputs: Vec<Buffer>,
    status: DispatchStatus,
}

#[derive(derive_more::Debug)]
struct DeviceQueue {
    device: DeviceSpec,
    signal: Arc<CpuTimelineSignal>,
    #[debug(skip)]
    sender: Mutex<Option<Sender<Job>>>,
    submitted: AtomicU64,
    #[debug(skip)]
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceQueue {
    fn spawn(device: DeviceSpec) -> Result<Arc<Self>> {
        let (sender, receiver) = mpsc::channel();
        let signal = Arc::new(CpuTimelineSignal::new());
        let worker_signal = Arc::clone(&signal);
        let worker = std::thread::Builder::new()
            .name(format!("tardy-{device}"))
            .spawn(move || worker_loop(device, receiver, worker_signal))
            .map_err(|err| DispatchSnafu { device, reason: format!("cannot start worker: {err}") }.build())?;

        debug!(device = %device, "device queue started");
        Ok(Arc::new(Self {
            device,
            signal,
            sender: Mutex::new(Some(sender)),
            submitted: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        }))
    }

    fn submit(&self, make_job: impl FnOnce(u64) -> Job) -> Result<()> {
        // Ticket order equals channel order.
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return QueueClosedSnafu { device: self.device }.fail();
        };
        let ticket = self.submitted.load(Ordering::Acquire) + 1;
        sender.send(make_job(ticket)).map_err(|_| QueueClosedSnafu { device: self.device }.build())?;
        self.submitted.store(ticket, Ordering::Release);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let target = self.submitted.load(Ordering::Acquire);
        self.signal.wait(target, None).context(DeviceSnafu)
    }

    fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            warn!(device = %self.device, "device worker panicked");
        }
    }
}

fn worker_loop(device: DeviceSpec, jobs: Receiver<Job>, signal: Arc<CpuTimelineSignal>) {
    while let Ok(job) = jobs.recv() {
        let ticket = job.ticket;
        run_job(device, job);
        signal.set(ticket);
    }
    trace!(device = %device, "device queue drained");
}

fn run_job(device: DeviceSpec, job: Job) {
    let Job { ticket, artifact, inputs, outputs, status } = job;

    let fail_all = |failure: Failure| {
        status.set(ExecutionState::Failed);
        metrics().execution_failures.inc();
        outputs.iter().for_each(|o| {
            o.fail(failure.clone());
        });
    };

    let mut literals = Vec::with_capacity(inputs.len());
    for input in &inputs {
        match input.wait() {
            Ok(literal) => literals.push(literal),
            Err(tardy_device::Error::Failed { source }) => {
                debug!(device = %device, dispatch.ticket = ticket, input.id = input.id(), "input failed, propagating");
                return fail_all(source);
            }
            Err(err) => return fail_all(Failure::new(err)),
        }
    }
    drop(inputs);

    metrics().executions.inc();
    let executable = Arc::clone(&artifact.executable);
    let result = catch_unwind(AssertUnwindSafe(|| executable.execute(&literals)));
    match result {
        Ok(Ok(values)) if values.len() == outputs.len() => {
            for (output, value) in outputs.iter().zip(values) {
                output.complete(value);
            }
            status.set(ExecutionState::Completed);
            trace!(device = %device, dispatch.ticket = ticket, graph.hash = %artifact.fingerprint.short(), "dispatch completed");
        }
        Ok(Ok(values)) => fail_all(Failure::new(
            DispatchSnafu {
                device,
                reason: format!("executable produced {} outputs, expected {}", values.len(), outputs.len()),
            }
            .build(),
        )),
        Ok(Err(err)) => {
            debug!(device = %device, dispatch.ticket = ticket, error = %err, "execution failed");
            fail_all(Failure::new(err));
        }
        Err(_) => fail_all(Failure::msg(format!("executable panicked on {device}"))),
    }
}

/// Owner of the per-device queues.
#[derive(Debug)]
pub struct Scheduler {
    store: Arc<DeviceDataStore>,
    queues: RwLock<HashMap<DeviceSpec, Arc<DeviceQueue>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(DeviceDataStore::new()))
    }
}

impl Scheduler {
    /// Scheduler allocating output buffers from `store`.
    pub fn new(store: Arc<DeviceDataStore>) -> Self {
        Self { store, queues: RwLock::new(HashMap::new()) }
    }

    pub fn store(&self) -> &Arc<DeviceDataStore> {
        &self.store
    }

    fn queue(&self, device: DeviceSpec) -> Result<Arc<DeviceQueue>> {
        if let Some(queue) = self.queues.read().get(&device) {
            return Ok(Arc::clone(queue));
        }
        let mut queues = self.queues.write();
        if let Some(queue) = queues.get(&device) {
            return Ok(Arc::clone(queue));
        }
        let queue = DeviceQueue::spawn(device)?;
        queues.insert(device, Arc::clone(&queue));
        Ok(queue)
    }

    /// Queue `artifact` on `device` and return its pending outputs.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Dispatch`] if `inputs` do not match the artifact's
    /// input signature. Execution failures never surface here; they fail the
    /// output buffers.
    pub fn submit(&self, device: DeviceSpec, artifact: Arc<CompiledArtifact>, inputs: Vec<Buffer>) -> Result<Dispatch> {
        snafu::ensure!(
            inputs.len() == artifact.input_shapes.len(),
            DispatchSnafu {
                device,
                reason: format!("expected {} inputs, got {}", artifact.input_shapes.len(), inputs.len()),
            }
        );
        for (position, (input, expected)) in inputs.iter().zip(&artifact.input_shapes).enumerate() {
            let shape = input.shape();
            snafu::ensure!(
                shape.dtype() == expected.dtype() && shape.same_dims(expected),
                DispatchSnafu { device, reason: format!("input {position} is {shape}, expected {expected}") }
            );
        }

        let outputs: Vec<Buffer> =
            artifact.output_shapes.iter().map(|shape| self.store.allocate(device, shape.clone())).collect();
        let status = DispatchStatus::new();

        let queue = self.queue(device)?;
        let mut ticket = 0;
        queue.submit(|t| {
            ticket = t;
            status.set(ExecutionState::Dispatched);
            Job { ticket: t, artifact: Arc::clone(&artifact), inputs, outputs: outputs.clone(), status: status.clone() }
        })?;

        trace!(device = %device, dispatch.ticket = ticket, graph.hash = %artifact.fingerprint.short(), "dispatched");
        Ok(Dispatch { device, ticket, outputs, status })
    }

    /// [`Self::submit`], returning only the pending outputs.
    pub fn dispatch(&self, device: DeviceSpec, artifact: Arc<CompiledArtifact>, inputs: Vec<Buffer>) -> Result<Vec<Buffer>> {
        Ok(self.submit(device, artifact, inputs)?.outputs)
    }

    /// Block until no buffer in `buffers` is pending.
    ///
    /// # Errors
    ///
    /// The original cause of the first failed buffer, in slice order.
    pub fn synchronize(&self, buffers: &[Buffer]) -> Result<()> {
        let mut first_failure = None;
        for buffer in buffers {
            if let Err(err) = buffer.wait()
                && first_failure.is_none()
            {
                first_failure = Some(err);
            }
        }
        match first_failure {
            Some(err) => Err(err).context(DeviceSnafu),
            None => Ok(()),
        }
    }

    /// Block until everything submitted to `device` so far has settled.
    pub fn synchronize_device(&self, device: DeviceSpec) -> Result<()> {
        let queue = self.queues.read().get(&device).cloned();
        match queue {
            Some(queue) => queue.wait_idle(),
            None => Ok(()),
        }
    }

    /// [`Self::synchronize_device`] for every device with a queue.
    pub fn synchronize_all(&self) -> Result<()> {
        let queues: Vec<_> = self.queues.read().values().cloned().collect();
        queues.iter().try_for_each(|q| q.wait_idle())
    }

    /// Submissions accepted by `device` so far.
    pub fn submitted(&self, device: DeviceSpec) -> u64 {
        self.queues.read().get(&device).map_or(0, |q| q.submitted.load(Ordering::Acquire))
    }

    /// Submissions `device` has settled so far.
    pub fn completed(&self, device: DeviceSpec) -> u64 {
        self.queues.read().get(&device).map_or(0, |q| q.signal.value())
    }

    /// Upload host data to `device`.
    pub fn upload(&self, device: DeviceSpec, literal: Literal) -> Buffer {
        metrics().host_to_device.inc();
        self.store.upload(device, literal)
    }

    /// Wait for `buffer` and read it back.
    pub fn read(&self, buffer: &Buffer) -> Result<Arc<Literal>> {
        metrics().device_to_host.inc();
        self.store.read(buffer).context(DeviceSnafu)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for queue in self.queues.get_mut().values() {
            queue.shutdown();
        }
    }
}
