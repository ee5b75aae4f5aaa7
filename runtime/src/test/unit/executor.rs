use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tardy_device::{DeviceDataStore, Failure, Literal};
use tardy_dtype::{DType, DeviceSpec};
use tardy_ir::{BinaryOp, CapturedGraph, Op, Precision};

use crate::test::{artifact, builder, compile, param, shape};
use crate::{Error, ExecutionState, KernelError, Scheduler};

fn scheduler() -> Scheduler {
    Scheduler::new(Arc::new(DeviceDataStore::new()))
}

fn scalar_f32() -> tardy_dtype::CanonicalShape {
    shape(DType::Float32, &[])
}

#[test]
fn test_same_device_runs_in_submission_order() {
    let scheduler = scheduler();
    let device = DeviceSpec::tpu(0);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut outputs = Vec::new();
    for i in 0..6u8 {
        let order = Arc::clone(&order);
        let job = artifact(i, vec![], vec![scalar_f32()], move |_| {
            // Earlier jobs take longer; only FIFO execution keeps the order.
            thread::sleep(Duration::from_millis(5 * (6 - i as u64)));
            order.lock().push(i);
            Ok(vec![Literal::scalar(i as f32)])
        });
        outputs.extend(scheduler.dispatch(device, job, vec![]).unwrap());
    }

    scheduler.synchronize_device(device).unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    assert!(outputs.iter().all(|o| o.is_ready()));
    assert_eq!(scheduler.submitted(device), 6);
    assert_eq!(scheduler.completed(device), 6);
}

#[test]
fn test_dispatch_returns_pending_outputs() {
    let scheduler = scheduler();
    let device = DeviceSpec::tpu(1);
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock();

    let job_gate = Arc::clone(&gate);
    let job = artifact(1, vec![], vec![scalar_f32()], move |_| {
        let _open = job_gate.lock();
        Ok(vec![Literal::scalar(1.0f32)])
    });
    let dispatch = scheduler.submit(device, job, vec![]).unwrap();
    assert!(dispatch.outputs[0].is_pending());
    assert_eq!(dispatch.ticket, 1);
    assert!(matches!(dispatch.status.get(), ExecutionState::Dispatched));

    drop(held);
    scheduler.synchronize(&dispatch.outputs).unwrap();
    assert_eq!(dispatch.status.get(), ExecutionState::Completed);
    assert_eq!(scheduler.read(&dispatch.outputs[0]).unwrap().to_vec::<f32>().unwrap(), vec![1.0]);
}

#[test]
fn test_execution_failure_fails_every_output() {
    let scheduler = scheduler();
    let device = DeviceSpec::tpu(0);
    let job = artifact(2, vec![], vec![scalar_f32(), scalar_f32()], |_| {
        Err(Error::Execution { node: 3, op: "div", source: KernelError::DivisionByZero })
    });

    let dispatch = scheduler.submit(device, job, vec![]).unwrap();
    let err = scheduler.synchronize(&dispatch.outputs).unwrap_err();
    assert_eq!(err.to_string(), "execution of node %3 (div) failed: integer division by zero");
    assert!(dispatch.outputs.iter().all(|o| o.is_failed()));
    assert!(dispatch.outputs[0].failure().unwrap().same_cause(&dispatch.outputs[1].failure().unwrap()));
    assert_eq!(dispatch.status.get(), ExecutionState::Failed);
}

#[test]
fn test_failed_input_propagates_original_cause() {
    let scheduler = scheduler();
    let upstream_device = DeviceSpec::tpu(0);
    let downstream_device = DeviceSpec::tpu(1);

    let upstream = scheduler.store().allocate(upstream_device, scalar_f32());
    let downstream = artifact(3, vec![scalar_f32()], vec![scalar_f32()], |inputs| Ok(vec![(*inputs[0]).clone()]));
    let outputs = scheduler.dispatch(downstream_device, downstream, vec![upstream.clone()]).unwrap();

    let cause = Failure::msg("upstream kernel crashed");
    upstream.fail(cause.clone());

    let err = scheduler.synchronize(&outputs).unwrap_err();
    assert_eq!(err.to_string(), "upstream kernel crashed");
    assert!(outputs[0].failure().unwrap().same_cause(&cause));
}

#[test]
fn test_cross_device_dependency() {
    let scheduler = scheduler();
    let b = builder();
    let x = param(&b, 0, DType::Float32, &[2]);
    let doubled = b.record_inferred(Op::Binary(BinaryOp::Add), &[x.clone(), x]).unwrap();
    let artifact = Arc::new(compile(&CapturedGraph::capture(&[doubled]), Precision::Default).unwrap());

    let input = scheduler.upload(DeviceSpec::tpu(0), Literal::from_slice(&[2], &[1.0f32, 2.0]).unwrap());
    let first = scheduler.dispatch(DeviceSpec::tpu(0), Arc::clone(&artifact), vec![input]).unwrap();
    let second = scheduler.dispatch(DeviceSpec::tpu(1), artifact, first).unwrap();

    let result = scheduler.read(&second[0]).unwrap();
    assert_eq!(result.to_vec::<f32>().unwrap(), vec![4.0, 8.0]);
}

#[test]
fn test_input_signature_is_checked() {
    let scheduler = scheduler();
    let device = DeviceSpec::cpu();
    let job = artifact(4, vec![shape(DType::Float32, &[2])], vec![scalar_f32()], |_| Ok(vec![Literal::scalar(0.0f32)]));

    let err = scheduler.dispatch(device, Arc::clone(&job), vec![]).unwrap_err();
    assert!(matches!(err, Error::Dispatch { .. }));

    let wrong = scheduler.upload(device, Literal::from_slice(&[3], &[1.0f32, 2.0, 3.0]).unwrap());
    let err = scheduler.dispatch(device, job, vec![wrong]).unwrap_err();
    assert_eq!(err.to_string(), "dispatch to CPU:0 rejected: input 0 is f32[3], expected f32[2]");
}

#[test]
fn test_panicking_executable_fails_outputs() {
    let scheduler = scheduler();
    let device = DeviceSpec::tpu(2);
    let job = artifact(5, vec![], vec![scalar_f32()], |_| panic!("kernel bug"));
    let outputs = scheduler.dispatch(device, job, vec![]).unwrap();
    assert!(scheduler.synchronize(&outputs).is_err());

    // The worker survives and keeps serving the queue.
    let next = artifact(6, vec![], vec![scalar_f32()], |_| Ok(vec![Literal::scalar(2.0f32)]));
    let outputs = scheduler.dispatch(device, next, vec![]).unwrap();
    scheduler.synchronize(&outputs).unwrap();
}

#[test]
fn test_synchronize_all() {
    let scheduler = scheduler();
    for ordinal in 0..3 {
        let job = artifact(7, vec![], vec![scalar_f32()], |_| {
            thread::sleep(Duration::from_millis(10));
            Ok(vec![Literal::scalar(0.0f32)])
        });
        scheduler.dispatch(DeviceSpec::tpu(ordinal), job, vec![]).unwrap();
    }
    scheduler.synchronize_all().unwrap();
    for ordinal in 0..3 {
        assert_eq!(scheduler.completed(DeviceSpec::tpu(ordinal)), 1);
    }
}
