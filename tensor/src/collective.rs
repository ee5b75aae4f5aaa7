//! Collectives on lazy tensors.
//!
//! The operand is realized first (a synchronization point for its device);
//! the result is a materialized tensor on the same device.

use snafu::ResultExt;
use tardy_device::Buffer;
use tardy_distributed::Participant;
use tardy_ir::ReduceOp;

use crate::LazyTensor;
use crate::error::*;

impl LazyTensor {
    fn collective(&self, run: impl FnOnce(&Buffer) -> tardy_distributed::Result<Buffer>) -> Result<LazyTensor> {
        let buffer = self.realize()?;
        let result = run(&buffer).context(CollectiveSnafu)?;
        Ok(LazyTensor::with_buffer(&self.ctx, result, self.dtype()))
    }

    /// Concatenate every replica's value along axis 0.
    pub fn all_gather(&self, participant: &Participant) -> Result<LazyTensor> {
        self.collective(|buffer| participant.all_gather(buffer))
    }

    pub fn all_reduce(&self, op: ReduceOp, participant: &Participant) -> Result<LazyTensor> {
        self.collective(|buffer| participant.all_reduce(op, buffer))
    }

    /// Value of replica `source` on every replica.
    pub fn broadcast_from(&self, source: usize, participant: &Participant) -> Result<LazyTensor> {
        self.collective(|buffer| participant.broadcast(source, buffer))
    }

    pub fn collective_permute(&self, pairs: &[(usize, usize)], participant: &Participant) -> Result<LazyTensor> {
        self.collective(|buffer| participant.collective_permute(pairs, buffer))
    }
}
