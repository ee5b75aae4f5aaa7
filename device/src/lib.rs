//! Device-side state for tardy.
//!
//! - [`Buffer`]: shared handle to device memory with monotonic readiness
//! - [`Literal`]: host-side tensor values
//! - [`DeviceDataStore`]: allocation, upload, readback and accounting
//! - [`sync`]: timeline signals ordering work per device

pub mod buffer;
pub mod error;
pub mod literal;
pub mod spec;
pub mod store;
pub mod sync;


pub use buffer::{Buffer, BufferState, DeviceStats, Failure};
pub use error::{Error, Result};
pub use literal::{Data, Element, Literal};
pub use spec::{DeviceKind, DeviceSpec, DeviceSpecExt};
pub use store::DeviceDataStore;
pub use sync::{CpuTimelineSignal, TimelineSignal};
