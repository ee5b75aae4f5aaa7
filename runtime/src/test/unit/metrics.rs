use crate::metrics::{metrics, metrics_report};

#[test]
fn test_counters_increase() {
    let before = metrics().syncs.get();
    metrics().syncs.inc();
    metrics().syncs.add(2);
    assert!(metrics().syncs.get() >= before + 3);
    assert!(metrics().value("Syncs").is_some_and(|v| v >= before + 3));
    assert_eq!(metrics().value("NoSuchCounter"), None);
}

#[test]
fn test_report_lists_every_counter() {
    let report = metrics_report();
    for name in ["GraphsCaptured", "Compilations", "CacheHits", "Executions", "ExecutionFailures", "HostToDevice", "DeviceToHost", "Syncs"] {
        assert!(report.contains(&format!("Counter: {name}\n  Value: ")), "missing {name}");
    }
}
