//! Replica-parallel execution.
//!
//! A supervisor starts one worker thread per replica and sends each its
//! [`ReplicaAssignment`] over a channel; the worker blocks on that message
//! before running user code. Results come back in replica order.

use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::thread;

use snafu::{ResultExt, ensure};
use tardy_dtype::DeviceSpec;
use tracing::{debug, error, info_span};

use crate::error::*;
use crate::topology::{Regime, TopologyConfig};

/// What one replica runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaAssignment {
    /// Global replica index.
    pub replica: usize,
    /// Index among this process's replicas.
    pub local_index: usize,
    pub device: DeviceSpec,
    pub replica_count: usize,
    pub process_rank: usize,
    pub world_size: usize,
}

/// Starts replicas according to a topology.
#[derive(Debug, Clone)]
pub struct Supervisor {
    topology: TopologyConfig,
}

impl Supervisor {
    pub fn new(topology: TopologyConfig) -> Self {
        Self { topology }
    }

    pub fn topology(&self) -> &TopologyConfig {
        &self.topology
    }

    /// Run `worker` once per local replica and collect the results by replica.
    ///
    /// In the [`Regime::ProcessPerChip`] regime several replicas share this
    /// process, so `worker` must not depend on exclusive process-global state.
    ///
    /// # Errors
    ///
    /// - [`Error::TopologyConfig`] when `replica_count` exceeds the local devices
    /// - [`Error::ReplicaSpawn`] when a thread cannot be started
    /// - [`Error::ReplicaPanicked`] for the first replica that panicked
    pub fn spawn<T, F>(&self, worker: F, replica_count: usize) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(ReplicaAssignment) -> T + Sync,
    {
        let devices = self.topology.local_devices();
        ensure!(
            replica_count <= devices.len(),
            TopologyConfigSnafu {
                variable: "TARDY_DEVICE_COUNT",
                reason: format!("{replica_count} replicas requested, {} local devices", devices.len()),
            }
        );
        if let Regime::ProcessPerChip { cores_per_chip } = self.topology.regime() {
            debug!(cores_per_chip, replicas = replica_count, "replicas share one process per chip");
        }

        let worker = &worker;
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(replica_count);
            for (local_index, device) in devices.into_iter().take(replica_count).enumerate() {
                let replica = self.topology.replica_index(local_index);
                let (sender, receiver) = mpsc::channel::<ReplicaAssignment>();
                let handle = thread::Builder::new()
                    .name(format!("tardy-replica-{replica}"))
                    .spawn_scoped(scope, move || {
                        let assignment = receiver.recv().ok()?;
                        let _span = info_span!("replica", replica = assignment.replica, device = %assignment.device).entered();
                        std::panic::catch_unwind(AssertUnwindSafe(|| worker(assignment))).ok()
                    })
                    .context(ReplicaSpawnSnafu { replica })?;

                let assignment = ReplicaAssignment {
                    replica,
                    local_index,
                    device,
                    replica_count: replica_count * self.topology.world_size,
                    process_rank: self.topology.process_rank,
                    world_size: self.topology.world_size,
                };
                // A closed channel means the thread is gone; its join reports it.
                let _ = sender.send(assignment);
                handles.push((replica, handle));
            }

            let mut results = Vec::with_capacity(handles.len());
            let mut panicked = None;
            for (replica, handle) in handles {
                match handle.join() {
                    Ok(Some(value)) => results.push(value),
                    _ => {
                        error!(replica, "replica panicked");
                        panicked.get_or_insert(replica);
                    }
                }
            }
            match panicked {
                Some(replica) => ReplicaPanickedSnafu { replica }.fail(),
                None => Ok(results),
            }
        })
    }
}

/// [`Supervisor::spawn`] over `replica_count` host devices in this process.
pub fn spawn<T, F>(worker: F, replica_count: usize) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(ReplicaAssignment) -> T + Sync,
{
    Supervisor::new(TopologyConfig::local(replica_count.max(1))).spawn(worker, replica_count)
}
