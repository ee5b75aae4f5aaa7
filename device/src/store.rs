//! Device data store: creation, upload, readback and accounting of buffers.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tardy_dtype::{CanonicalShape, DeviceSpec};
use tracing::{debug, trace};

use crate::buffer::{Buffer, BufferState, DeviceStats};
use crate::error::Result;
use crate::literal::Literal;

/// Owns per-device accounting and hands out buffers.
///
/// Buffers are reference counted; a buffer is freed when its last handle
/// drops, whether or not [`DeviceDataStore::release`] was called.
#[derive(Debug, Default)]
pub struct DeviceDataStore {
    devices: RwLock<HashMap<DeviceSpec, Arc<DeviceStats>>>,
}

static STORE: Lazy<DeviceDataStore> = Lazy::new(DeviceDataStore::new);

impl DeviceDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store.
    pub fn global() -> &'static Self {
        &STORE
    }

    fn stats(&self, device: DeviceSpec) -> Arc<DeviceStats> {
        // Fast path: read lock
        if let Some(stats) = self.devices.read().get(&device) {
            return Arc::clone(stats);
        }
        Arc::clone(self.devices.write().entry(device).or_default())
    }

    /// Pending buffer to be filled by an execution.
    pub fn allocate(&self, device: DeviceSpec, shape: CanonicalShape) -> Buffer {
        let stats = self.stats(device);
        Buffer::with_state(device, shape, BufferState::Pending, Some(&stats))
    }

    /// Ready buffer holding host data.
    ///
    /// The buffer holds the device's storage dtype for the literal's dtype: a
    /// reduced-width device keeps `f64` data as `f32` and 16-bit integers as
    /// 32-bit ones.
    pub fn upload(&self, device: DeviceSpec, literal: Literal) -> Buffer {
        let logical = literal.dtype();
        let policy = device.storage_policy();
        let stored = policy.storage_dtype(logical);
        let literal = if stored == logical {
            literal
        } else {
            trace!(device = %device, %logical, %stored, lossless = policy.is_lossless(logical), "converting to storage dtype");
            literal.cast(stored)
        };

        debug!(device = %device, shape = %literal.shape(), "host to device transfer");
        let stats = self.stats(device);
        let shape = literal.shape().clone();
        Buffer::with_state(device, shape, BufferState::Ready(Arc::new(literal)), Some(&stats))
    }

    /// Drop one handle. Returns `true` when it was the last one.
    pub fn release(&self, buffer: Buffer) -> bool {
        buffer.handle_count() == 1
    }

    /// Wait for `buffer` and return its contents.
    ///
    /// # Errors
    ///
    /// The buffer's original failure cause.
    pub fn read(&self, buffer: &Buffer) -> Result<Arc<Literal>> {
        let literal = buffer.wait()?;
        debug!(device = %buffer.device(), buffer.id = buffer.id(), "device to host transfer");
        Ok(literal)
    }

    /// Split `buffer` into device-resident rows along its leading axis.
    ///
    /// Waits for the buffer; nothing is transferred to the host.
    pub fn unstack(&self, buffer: &Buffer) -> Result<Vec<Buffer>> {
        let literal = buffer.wait()?;
        let device = buffer.device();
        let rows = literal.shape().dims().first().copied().unwrap_or(0);
        let stats = self.stats(device);
        trace!(device = %device, buffer.id = buffer.id(), rows, "device-side unstack");
        (0..rows)
            .map(|index| {
                let row = literal.row(index)?;
                let shape = row.shape().clone();
                Ok(Buffer::with_state(device, shape, BufferState::Ready(Arc::new(row)), Some(&stats)))
            })
            .collect()
    }

    /// Stack equally shaped buffers of `device` along a new leading axis.
    ///
    /// Waits for every part; nothing is transferred to the host.
    pub fn stack(&self, device: DeviceSpec, parts: &[Buffer]) -> Result<Buffer> {
        let literals = parts.iter().map(Buffer::wait).collect::<Result<Vec<_>>>()?;
        let stacked = Literal::stack(&literals)?;
        trace!(device = %device, parts = parts.len(), shape = %stacked.shape(), "device-side stack");
        let stats = self.stats(device);
        let shape = stacked.shape().clone();
        Ok(Buffer::with_state(device, shape, BufferState::Ready(Arc::new(stacked)), Some(&stats)))
    }

    pub fn live_buffers(&self, device: DeviceSpec) -> usize {
        self.devices.read().get(&device).map_or(0, |s| s.live_buffers())
    }

    pub fn live_bytes(&self, device: DeviceSpec) -> usize {
        self.devices.read().get(&device).map_or(0, |s| s.live_bytes())
    }

    /// Devices that ever held a buffer.
    pub fn devices(&self) -> Vec<DeviceSpec> {
        let mut devices: Vec<_> = self.devices.read().keys().copied().collect();
        devices.sort();
        devices
    }
}
