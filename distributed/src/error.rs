use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Participants disagreed on the operation or its shape. The group is poisoned.
    #[snafu(display("collective mismatch at rank {rank}: group runs {expected}, rank called {actual}"))]
    CollectiveMismatch { rank: usize, expected: String, actual: String },

    /// The group deadline passed before every participant arrived. The group is poisoned.
    #[snafu(display("collective {op} timed out after {waited_ms}ms"))]
    CollectiveTimeout { op: String, waited_ms: u64 },

    /// Another participant aborted the group.
    #[snafu(display("collective group aborted by rank {rank}: {reason}"))]
    CollectiveAborted { rank: usize, reason: String },

    #[snafu(display("rank {rank} out of range for a group of {size}"))]
    InvalidRank { rank: usize, size: usize },

    #[snafu(display("invalid permutation: {reason}"))]
    InvalidPermutation { reason: String },

    /// Topology variables are missing or malformed.
    #[snafu(display("invalid topology configuration: {variable}: {reason}"))]
    TopologyConfig { variable: &'static str, reason: String },

    #[snafu(display("replica {replica} panicked"))]
    ReplicaPanicked { replica: usize },

    #[snafu(display("cannot start replica {replica}: {source}"))]
    ReplicaSpawn { replica: usize, source: std::io::Error },

    /// Buffer access failed. Display is the underlying cause.
    #[snafu(display("{source}"))]
    Device { source: tardy_device::Error },
}
