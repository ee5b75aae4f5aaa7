use tardy_dtype::{CanonicalShape, DType, DeviceSpec};
use test_case::test_case;

use crate::{DeviceDataStore, Failure, Literal};

#[test]
fn test_accounting_follows_handles() {
    let store = DeviceDataStore::new();
    let device = DeviceSpec::tpu(0);

    let a = store.allocate(device, CanonicalShape::new(DType::Float32, [4]));
    let b = store.upload(device, Literal::from_slice(&[2], &[1i64, 2]).unwrap());
    assert_eq!(store.live_buffers(device), 2);
    assert_eq!(store.live_bytes(device), 16 + 16);
    assert_eq!(store.live_buffers(DeviceSpec::tpu(1)), 0);

    let a_clone = a.clone();
    assert!(!store.release(a));
    assert_eq!(store.live_buffers(device), 2);
    assert!(store.release(a_clone));
    assert_eq!(store.live_buffers(device), 1);

    drop(b);
    assert_eq!(store.live_buffers(device), 0);
    assert_eq!(store.live_bytes(device), 0);
    assert_eq!(store.devices(), vec![device]);
}

#[test]
fn test_upload_is_ready_and_readable() {
    let store = DeviceDataStore::new();
    let buffer = store.upload(DeviceSpec::cpu(), Literal::from_slice(&[3], &[1u8, 2, 3]).unwrap());
    assert!(buffer.is_ready());
    assert_eq!(store.read(&buffer).unwrap().to_vec::<u8>().unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_read_failed_buffer() {
    let store = DeviceDataStore::new();
    let buffer = store.allocate(DeviceSpec::cpu(), CanonicalShape::new(DType::Float32, [1]));
    buffer.fail(Failure::msg("kernel crashed"));
    assert_eq!(store.read(&buffer).unwrap_err().to_string(), "kernel crashed");
}

#[test]
fn test_reduced_storage_holds_f32() {
    let store = DeviceDataStore::new();
    let values = [0.1f64, 1e300];
    let buffer = store.upload(DeviceSpec::neuron(0), Literal::from_slice(&[2], &values).unwrap());

    let literal = buffer.literal().unwrap();
    assert_eq!(literal.dtype(), DType::Float32);
    let read = literal.to_vec::<f32>().unwrap();
    assert_eq!(read[0], 0.1f32);
    assert!(read[1].is_infinite(), "out-of-range f64 saturates in f32 storage");
    assert_eq!(store.live_bytes(DeviceSpec::neuron(0)), 8);

    let native = store.upload(DeviceSpec::tpu(0), Literal::from_slice(&[2], &values).unwrap());
    assert_eq!(native.literal().unwrap().to_vec::<f64>().unwrap(), values.to_vec());
}

#[test_case(DType::Int16, DType::Int32)]
#[test_case(DType::UInt16, DType::UInt32)]
#[test_case(DType::Int64, DType::Int64)]
#[test_case(DType::UInt32, DType::UInt32)]
fn test_reduced_storage_integer_widths(logical: DType, stored: DType) {
    let store = DeviceDataStore::new();
    let literal = Literal::from_slice(&[2], &[7i64, 100]).unwrap().cast(logical);
    let buffer = store.upload(DeviceSpec::neuron(0), literal);
    let held = buffer.literal().unwrap();
    assert_eq!(held.dtype(), stored);
    assert_eq!(held.to_f64_vec(), vec![7.0, 100.0]);
}

#[test]
fn test_unstack_and_stack_stay_on_device() {
    let store = DeviceDataStore::new();
    let device = DeviceSpec::tpu(0);
    let buffer = store.upload(device, Literal::from_slice(&[3, 2], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap());

    let rows = store.unstack(&buffer).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.is_ready() && row.shape().dims() == [2]));
    assert_eq!(store.live_buffers(device), 4);
    assert_eq!(rows[2].literal().unwrap().to_vec::<f32>().unwrap(), vec![5.0, 6.0]);

    let stacked = store.stack(device, &[rows[2].clone(), rows[0].clone()]).unwrap();
    assert_eq!(stacked.shape().dims(), &[2, 2]);
    assert_eq!(stacked.literal().unwrap().to_vec::<f32>().unwrap(), vec![5.0, 6.0, 1.0, 2.0]);
}

#[test]
fn test_stack_reports_failed_part() {
    let store = DeviceDataStore::new();
    let device = DeviceSpec::cpu();
    let ok = store.upload(device, Literal::from_slice(&[1], &[1.0f32]).unwrap());
    let failed = store.allocate(device, CanonicalShape::new(DType::Float32, [1]));
    failed.fail(Failure::msg("step crashed"));
    assert_eq!(store.stack(device, &[ok, failed]).unwrap_err().to_string(), "step crashed");
}
