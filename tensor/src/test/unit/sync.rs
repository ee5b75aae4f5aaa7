use std::path::PathBuf;

use tardy_runtime::metrics::metrics;

use crate::test::{DEVICE, ctx, f32s};
use crate::{Context, DeviceSpec, RuntimeConfig};

#[test]
fn test_sync_materializes_live_tensors() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    let b = f32s(&ctx, &[2], &[3.0, 4.0]);
    let c = &a + &b;
    let d = &c * &a;
    let dropped = &d - &b;
    drop(dropped);
    assert_eq!(ctx.pending_count(DEVICE), 2);

    ctx.sync(DEVICE, "step").unwrap();
    assert!(c.is_materialized());
    assert!(d.is_materialized());
    assert_eq!(ctx.pending_count(DEVICE), 0);
    assert_eq!(c.to_vec::<f32>().unwrap(), vec![4.0, 6.0]);
    assert_eq!(d.to_vec::<f32>().unwrap(), vec![4.0, 12.0]);
}

#[test]
fn test_sync_without_pending_work_is_noop() {
    let ctx = ctx();
    ctx.sync(DEVICE, "idle").unwrap();
    let a = f32s(&ctx, &[1], &[1.0]);
    ctx.sync(DEVICE, "idle").unwrap();
    assert!(a.is_materialized());
    assert_eq!(ctx.cache().len(), 0);
}

#[test]
fn test_new_data_reuses_artifact() {
    let ctx = ctx();
    for step in 0..3 {
        let x = f32s(&ctx, &[2], &[step as f32, 1.0]);
        let y = f32s(&ctx, &[2], &[2.0, 2.0]);
        let z = &x * &y;
        assert_eq!(z.to_vec::<f32>().unwrap(), vec![2.0 * step as f32, 2.0]);
    }
    let stats = ctx.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.entries, 1);
}

#[test]
fn test_different_shapes_compile_separately() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    (&a + &a).realize().unwrap();
    let b = f32s(&ctx, &[3], &[1.0, 2.0, 3.0]);
    (&b + &b).realize().unwrap();
    assert_eq!(ctx.cache().len(), 2);
}

#[test]
fn test_set_config_resets_cache() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    (&a + &a).realize().unwrap();
    assert_eq!(ctx.cache().len(), 1);

    ctx.set_config(RuntimeConfig::builder().debug(true).build());
    assert_eq!(ctx.cache().len(), 0);
    assert!(ctx.config().debug);
}

#[test]
fn test_schedule_returns_backing_buffers() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    let b = &a + &a;
    let c = &b + &a;
    let buffers = ctx.schedule_tensors(&[b.clone(), c.clone(), a.clone()], "step").unwrap();
    assert_eq!(buffers.len(), 3);
    assert_eq!(Some(buffers[0].clone()), b.buffer());
    assert_eq!(Some(buffers[1].clone()), c.buffer());
    assert_eq!(Some(buffers[2].clone()), a.buffer());

    ctx.scheduler().synchronize(&buffers).unwrap();
    assert_eq!(c.to_vec::<f32>().unwrap(), vec![3.0, 6.0]);
}

#[test]
fn test_sync_tensors_across_devices() {
    let ctx = ctx();
    let second = DeviceSpec::tpu(1);
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    let b = ctx.from_slice(second, &[2], &[5.0f32, 6.0]).unwrap();
    let x = &a + &a;
    let y = &b * &b;

    ctx.sync_tensors(&[x.clone(), y.clone()], "barrier").unwrap();
    assert!(x.is_materialized() && y.is_materialized());
    assert_eq!(y.device(), second);
    assert_eq!(ctx.devices(), vec![DEVICE, second]);
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![25.0, 36.0]);
}

#[test]
fn test_sync_all_covers_every_device() {
    let ctx = ctx();
    let a = f32s(&ctx, &[1], &[2.0]);
    let b = ctx.from_slice(DeviceSpec::tpu(3), &[1], &[3.0f32]).unwrap();
    let x = &a * &a;
    let y = &b * &b;
    ctx.sync_all("mark step").unwrap();
    assert!(x.is_materialized() && y.is_materialized());
}

#[test]
fn test_compile_failure_is_reraised_on_read() {
    let ctx = ctx();
    let p = ctx.from_slice(DEVICE, &[2], &[true, false]).unwrap();
    let q = p.dot(&p).unwrap();

    let first = q.to_vec::<bool>().unwrap_err().to_string();
    assert!(first.contains("dot is not supported for pred"), "{first}");
    assert!(q.is_materialized());

    let second = q.to_vec::<bool>().unwrap_err().to_string();
    assert!(second.contains("dot is not supported for pred"), "{second}");
    assert_eq!(ctx.cache().stats().failures, 1);
}

#[test]
fn test_integer_division_by_zero_fails_outputs() {
    let ctx = ctx();
    let a = ctx.from_slice(DEVICE, &[2], &[4i32, 9]).unwrap();
    let b = ctx.from_slice(DEVICE, &[2], &[2i32, 0]).unwrap();
    let q = a.try_div(&b).unwrap();

    let err = q.to_vec::<i32>().unwrap_err().to_string();
    assert!(err.contains("integer division by zero"), "{err}");

    let ok = a.try_div(&a).unwrap();
    assert_eq!(ok.to_vec::<i32>().unwrap(), vec![1, 1]);
}

#[test]
fn test_save_graphs_appends_dump() {
    let path: PathBuf = std::env::temp_dir().join(format!("tardy-graphs-{}.txt", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let ctx = Context::builder().config(RuntimeConfig::builder().save_graphs(path.clone()).build()).build();

    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    (&a + &a).to_vec::<f32>().unwrap();

    let dump = std::fs::read_to_string(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert!(dump.contains("cause=value read"), "{dump}");
    assert!(dump.contains("add(%0, %0)"), "{dump}");
    assert!(dump.contains("Graph Hash:"), "{dump}");
}

#[test]
fn test_sync_counts_in_metrics() {
    let before = metrics().syncs.get();
    let ctx = ctx();
    let a = f32s(&ctx, &[1], &[1.0]);
    (&a + &a).realize().unwrap();
    assert!(metrics().syncs.get() > before);
}

#[test]
fn test_debug_file_records_compile_once() {
    let path: PathBuf = std::env::temp_dir().join(format!("tardy-debug-{}.txt", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let ctx = Context::builder().config(RuntimeConfig::builder().debug_file(path.clone()).build()).build();

    for step in 0..2 {
        let a = f32s(&ctx, &[2], &[step as f32, 1.0]);
        let b = f32s(&ctx, &[2], &[2.0, step as f32]);
        (&a * &b).to_vec::<f32>().unwrap();
    }

    let text = std::fs::read_to_string(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(text.matches("Compilation Cause").count(), 1, "{text}");
    assert_eq!(text.matches("Post Compilation Analysis: Graph input size:").count(), 1, "{text}");
    assert_eq!(text.matches("Execution Cause").count(), 2, "{text}");
    assert!(text.contains("Compilation Analysis:   value read"), "{text}");
    assert!(text.contains("Number of Graph Inputs: 2"), "{text}");

    let hashes: Vec<&str> =
        text.lines().filter_map(|line| line.split_once("Graph Hash: ").map(|(_, hash)| hash)).collect();
    assert_eq!(hashes.len(), 4, "{text}");
    assert!(hashes.iter().all(|hash| *hash == hashes[0]), "{text}");
    assert_eq!(ctx.cache().stats().misses, 1);
}

#[test]
fn test_unsynced_handles_are_pruned() {
    let ctx = ctx();
    let a = f32s(&ctx, &[2], &[1.0, 2.0]);
    for _ in 0..2_000 {
        drop(a.try_neg().unwrap());
    }

    let graph = ctx.device_graph(DEVICE);
    assert!(graph.tracked_slots() <= 256, "{} slots", graph.tracked_slots());
    assert!(graph.builder.root_slots() <= 1024, "{} root slots", graph.builder.root_slots());
    assert_eq!(ctx.pending_count(DEVICE), 0);
}
