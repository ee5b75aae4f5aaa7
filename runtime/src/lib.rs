//! Compilation and execution for tardy graphs.
//!
//! - [`compiler`] - Compiler backend boundary and the reference compiler
//! - [`cache`] - Fingerprint-keyed compilation cache with single flight
//! - [`executor`] - Per-device FIFO queues and synchronization
//! - [`lowering`] - bf16 matrix unit emulation for precision modes
//! - [`config`] - Runtime configuration
//! - [`metrics`] - Process counters
//! - [`debug`] - Graph dumps and sync logging

pub mod cache;
pub mod compiler;
pub mod config;
pub mod debug;
pub mod error;
pub mod executor;
pub mod kernel;
pub mod lowering;
pub mod metrics;
pub mod program;

#[cfg(test)]
pub mod test;

pub use cache::{CacheStats, CompilationCache};
pub use compiler::{CompileRequest, CompiledArtifact, Compiler, Executable, ReferenceCompiler};
pub use config::RuntimeConfig;
pub use error::{CompileError, Error, KernelError, Result};
pub use executor::{Dispatch, DispatchStatus, ExecutionState, Scheduler};
pub use metrics::{metrics, metrics_report};
pub use program::ReferenceProgram;
