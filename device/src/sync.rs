//! Timeline signals for per-device ordering.
//!
//! A timeline signal is a monotonically increasing counter. A device queue
//! numbers its submissions `1, 2, 3, ...` and advances the signal as each
//! one settles; waiting for submission `n` means waiting until the signal
//! reaches `n`.
//!
//! ```ignore
//! let signal = CpuTimelineSignal::new();
//!
//! // Worker thread
//! signal.set(1);
//!
//! // Synchronizing thread
//! signal.wait(1, None)?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, TimeoutSnafu};

/// Monotonic timeline signal.
pub trait TimelineSignal: Send + Sync + std::fmt::Debug {
    fn value(&self) -> u64;

    /// Raise the signal to `value`. Lower values are ignored.
    fn set(&self, value: u64);

    /// Block until the signal reaches `value`, or until `timeout` passes.
    fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<()>;

    fn is_reached(&self, value: u64) -> bool {
        self.value() >= value
    }
}

/// Host timeline signal: an atomic counter plus a condvar for waiters.
#[derive(Debug, Default)]
pub struct CpuTimelineSignal {
    value: AtomicU64,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl CpuTimelineSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(initial: u64) -> Self {
        Self { value: AtomicU64::new(initial), ..Self::default() }
    }
}

impl TimelineSignal for CpuTimelineSignal {
    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn set(&self, value: u64) {
        // Waiters hold the mutex between their check and their wait.
        let _guard = self.mutex.lock();
        self.value.fetch_max(value, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    fn wait(&self, target: u64, timeout: Option<Duration>) -> Result<()> {
        if self.value() >= target {
            return Ok(());
        }

        let mut guard = self.mutex.lock();
        let deadline = timeout.map(|t| Instant::now() + t);

        while self.value() < target {
            match deadline {
                None => self.condvar.wait(&mut guard),
                Some(deadline) => {
                    if self.condvar.wait_until(&mut guard, deadline).timed_out() && self.value() < target {
                        let waited_ms = timeout.map_or(0, |t| t.as_millis() as u64);
                        return TimeoutSnafu {
                            what: format!("timeline value {target} (current {})", self.value()),
                            waited_ms,
                        }
                        .fail();
                    }
                }
            }
        }
        Ok(())
    }
}
