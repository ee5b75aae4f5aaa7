//! Multi-device execution for tardy.
//!
//! - [`collective`] - Rendezvous collectives across the replicas of a group
//! - [`topology`] - Start-up device topology and accelerator regimes
//! - [`spawn`] - Supervisor running one worker per replica

pub mod collective;
pub mod error;
pub mod spawn;
pub mod topology;


pub use collective::{CollectiveGroup, Participant};
pub use error::{Error, Result};
pub use spawn::{ReplicaAssignment, Supervisor, spawn};
pub use topology::{Accelerator, Regime, TopologyConfig};
