use std::error::Error as _;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tardy_dtype::{CanonicalShape, DType, DeviceSpec};

use crate::{Buffer, BufferState, Error, Failure, Literal};

fn shape() -> CanonicalShape {
    CanonicalShape::new(DType::Float32, [2])
}

#[derive(Debug)]
struct Root;

impl std::fmt::Display for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("disk on fire")
    }
}

impl std::error::Error for Root {}

#[derive(Debug)]
struct Wrapped(Root);

impl std::fmt::Display for Wrapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("execution failed")
    }
}

impl std::error::Error for Wrapped {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

#[test]
fn test_complete_is_monotonic() {
    let buffer = Buffer::pending(DeviceSpec::tpu(0), shape());
    assert!(buffer.is_pending());

    assert!(buffer.complete(Literal::from_slice(&[2], &[1.0f32, 2.0]).unwrap()));
    assert!(buffer.is_ready());

    // Second transitions are rejected and leave the state alone.
    assert!(!buffer.complete(Literal::from_slice(&[2], &[9.0f32, 9.0]).unwrap()));
    assert!(!buffer.fail(Failure::msg("late")));
    assert_eq!(buffer.wait().unwrap().to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_fail_is_monotonic() {
    let buffer = Buffer::pending(DeviceSpec::tpu(0), shape());
    assert!(buffer.fail(Failure::msg("boom")));
    assert!(!buffer.complete(Literal::zeros(shape())));
    assert!(buffer.is_failed());
    assert!(matches!(buffer.state(), BufferState::Failed(_)));
}

#[test]
fn test_wait_surfaces_original_cause() {
    let buffer = Buffer::pending(DeviceSpec::tpu(0), shape());
    let failure = Failure::new(Wrapped(Root));
    buffer.fail(failure.clone());

    let err = buffer.wait().unwrap_err();
    assert_eq!(err.to_string(), "execution failed");
    assert!(matches!(&err, Error::Failed { source } if source.same_cause(&failure)));

    // Error -> Failure -> Root
    let failure_source = err.source().unwrap();
    assert_eq!(failure_source.to_string(), "execution failed");
    assert_eq!(failure_source.source().unwrap().to_string(), "disk on fire");
}

#[test]
fn test_wait_blocks_until_ready() {
    let buffer = Buffer::pending(DeviceSpec::tpu(0), shape());
    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            buffer.complete(Literal::from_slice(&[2], &[3.0f32, 4.0]).unwrap())
        })
    };

    let literal = buffer.wait().unwrap();
    assert!(producer.join().unwrap());
    assert_eq!(literal.to_vec::<f32>().unwrap(), vec![3.0, 4.0]);
}

#[test]
fn test_wait_timeout() {
    let buffer = Buffer::pending(DeviceSpec::tpu(0), shape());
    let err = buffer.wait_timeout(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, Error::Timeout { waited_ms: 20, .. }));
}

#[test]
fn test_clones_share_state() {
    let buffer = Buffer::pending(DeviceSpec::cpu(), shape());
    let clone = buffer.clone();
    assert_eq!(buffer, clone);
    assert_eq!(buffer.handle_count(), 2);

    clone.complete(Literal::zeros(shape()));
    assert!(buffer.is_ready());
    assert!(Arc::ptr_eq(&buffer.literal().unwrap(), &clone.literal().unwrap()));
}

#[test]
fn test_ids_are_unique() {
    let a = Buffer::pending(DeviceSpec::cpu(), shape());
    let b = Buffer::pending(DeviceSpec::cpu(), shape());
    assert_ne!(a.id(), b.id());
    assert_ne!(a, b);
}
