//! Lazy tensors for tardy.
//!
//! Operations on a [`LazyTensor`] record IR nodes instead of executing. A
//! synchronization point (an explicit [`Context::sync`] or a value read)
//! captures the pending graph of a device, fingerprints it together with the
//! precision mode, compiles it at most once per fingerprint, and dispatches
//! it to the device's worker.
//!
//! ```ignore
//! let ctx = Context::builder().build();
//! let device = DeviceSpec::tpu(0);
//! let a = ctx.from_slice(device, &[3], &[1.0f32, 2.0, 3.0])?;
//! let b = ctx.from_slice(device, &[3], &[4.0f32, 5.0, 6.0])?;
//! let c = &a + &b; // recorded, not executed
//! assert_eq!(c.to_vec::<f32>()?, vec![5.0, 7.0, 9.0]);
//! ```

pub mod arithmetic;
pub mod broadcast;
pub mod collective;
pub mod context;
pub mod error;
pub mod matmul;
pub mod reduce;
pub mod scan;
pub mod shape_ops;
pub mod sync;
pub mod tensor;
pub mod traits;


pub use context::Context;
pub use error::{Error, Result};
pub use reduce::AxisSpec;
pub use scan::{Scanned, scan, scan_with};
pub use tensor::{LazyTensor, TensorState};

pub use tardy_dtype::{DType, DeviceSpec};
pub use tardy_ir::{ConstValue, Precision, ReduceOp};
pub use tardy_runtime::RuntimeConfig;
