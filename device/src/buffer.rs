//! Device buffers with readiness tracking.
//!
//! A [`Buffer`] is a shared handle to device memory (host memory on the
//! reference backend) plus its readiness:
//!
//! ```text
//! Pending ──complete──▶ Ready(literal)
//!    │
//!    └────fail────────▶ Failed(cause)
//! ```
//!
//! Transitions are monotonic: once a buffer left `Pending`, further
//! `complete`/`fail` calls are rejected and return `false`. Readers block in
//! [`Buffer::wait`] until the buffer is no longer pending.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tardy_dtype::{CanonicalShape, DeviceSpec};
use tracing::trace;

use crate::error::*;
use crate::literal::Literal;

static BUFFER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_buffer_id() -> u64 {
    BUFFER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Shared, cloneable failure cause.
///
/// Wraps the original error so every buffer failed by one execution reports
/// the same diagnostic, and `source()` reaches the original chain.
#[derive(Clone)]
pub struct Failure(Arc<dyn std::error::Error + Send + Sync + 'static>);

#[derive(Debug)]
struct Message(String);

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

impl Failure {
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(error))
    }

    pub fn from_arc(error: Arc<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        Self(error)
    }

    /// Failure with only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// The original error.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }

    /// Whether two failures share one cause.
    pub fn same_cause(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::fmt::Debug for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Failure").field(&self.0).finish()
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Clone)]
pub enum BufferState {
    Pending,
    Ready(Arc<Literal>),
    Failed(Failure),
}

impl BufferState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Live-buffer accounting shared between a store and its buffers.
#[derive(Debug, Default)]
pub struct DeviceStats {
    live_buffers: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl DeviceStats {
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Acquire)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    fn track(&self, bytes: usize) {
        self.live_buffers.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    fn untrack(&self, bytes: usize) {
        self.live_buffers.fetch_sub(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct BufferInner {
    id: u64,
    device: DeviceSpec,
    shape: CanonicalShape,
    state: Mutex<BufferState>,
    changed: Condvar,
    stats: Option<Weak<DeviceStats>>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        if let Some(stats) = self.stats.as_ref().and_then(Weak::upgrade) {
            stats.untrack(self.shape.size_bytes());
        }
        trace!(buffer.id = self.id, device = %self.device, "buffer released");
    }
}

/// Shared handle to one device buffer. Clones refer to the same buffer.
#[derive(Debug, Clone)]
pub struct Buffer(Arc<BufferInner>);

impl Buffer {
    /// Untracked pending buffer.
    pub fn pending(device: DeviceSpec, shape: CanonicalShape) -> Self {
        Self::with_state(device, shape, BufferState::Pending, None)
    }

    /// Untracked buffer that is ready with `literal`.
    pub fn ready(device: DeviceSpec, literal: Literal) -> Self {
        let shape = literal.shape().clone();
        Self::with_state(device, shape, BufferState::Ready(Arc::new(literal)), None)
    }

    pub(crate) fn with_state(
        device: DeviceSpec,
        shape: CanonicalShape,
        state: BufferState,
        stats: Option<&Arc<DeviceStats>>,
    ) -> Self {
        if let Some(stats) = stats {
            stats.track(shape.size_bytes());
        }
        Self(Arc::new(BufferInner {
            id: next_buffer_id(),
            device,
            shape,
            state: Mutex::new(state),
            changed: Condvar::new(),
            stats: stats.map(Arc::downgrade),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn device(&self) -> DeviceSpec {
        self.0.device
    }

    pub fn shape(&self) -> &CanonicalShape {
        &self.0.shape
    }

    /// Snapshot of the readiness state.
    pub fn state(&self) -> BufferState {
        self.0.state.lock().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.0.state.lock().is_pending()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.0.state.lock(), BufferState::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.0.state.lock(), BufferState::Failed(_))
    }

    /// Failure cause, if failed.
    pub fn failure(&self) -> Option<Failure> {
        match &*self.0.state.lock() {
            BufferState::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Contents without waiting, if ready.
    pub fn literal(&self) -> Option<Arc<Literal>> {
        match &*self.0.state.lock() {
            BufferState::Ready(literal) => Some(literal.clone()),
            _ => None,
        }
    }

    /// `Pending -> Ready`. Returns `false` if the buffer already left `Pending`.
    pub fn complete(&self, literal: Literal) -> bool {
        self.transition(BufferState::Ready(Arc::new(literal)))
    }

    /// `Pending -> Failed`. Returns `false` if the buffer already left `Pending`.
    pub fn fail(&self, failure: Failure) -> bool {
        self.transition(BufferState::Failed(failure))
    }

    fn transition(&self, next: BufferState) -> bool {
        let mut state = self.0.state.lock();
        if !state.is_pending() {
            trace!(buffer.id = self.0.id, "rejected readiness transition on settled buffer");
            return false;
        }
        *state = next;
        self.0.changed.notify_all();
        true
    }

    /// Block until the buffer is no longer pending.
    ///
    /// # Errors
    ///
    /// [`Error::Failed`] carrying the producer's original cause.
    pub fn wait(&self) -> Result<Arc<Literal>> {
        let mut state = self.0.state.lock();
        while state.is_pending() {
            self.0.changed.wait(&mut state);
        }
        settled(&state)
    }

    /// [`Self::wait`] with a deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Arc<Literal>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.0.state.lock();
        while state.is_pending() {
            if self.0.changed.wait_until(&mut state, deadline).timed_out() && state.is_pending() {
                return TimeoutSnafu { what: format!("buffer {}", self.0.id), waited_ms: timeout.as_millis() as u64 }
                    .fail();
            }
        }
        settled(&state)
    }

    /// Number of live handles to this buffer.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

fn settled(state: &BufferState) -> Result<Arc<Literal>> {
    match state {
        BufferState::Ready(literal) => Ok(literal.clone()),
        BufferState::Failed(failure) => Err(Error::Failed { source: failure.clone() }),
        BufferState::Pending => unreachable!("settled() called on a pending buffer"),
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Buffer {}
