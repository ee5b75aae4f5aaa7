use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tardy_ir::Fingerprint;

use crate::test::stub_artifact;
use crate::{CompilationCache, CompileError, CompiledArtifact};

fn stub(tag: u8) -> CompiledArtifact {
    stub_artifact(tag, vec![], vec![], |_| Ok(vec![]))
}

#[test]
fn test_single_flight() {
    const THREADS: usize = 16;
    let cache = Arc::new(CompilationCache::new());
    let compiles = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));
    let key = Fingerprint([7; 32]);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (cache, compiles, barrier) = (Arc::clone(&cache), Arc::clone(&compiles), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compile(key, || {
                        compiles.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok::<_, CompileError>(stub(7))
                    })
                    .unwrap()
            })
        })
        .collect();

    let artifacts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(compiles.load(Ordering::SeqCst), 1);
    assert!(artifacts.iter().all(|a| Arc::ptr_eq(a, &artifacts[0])));

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, THREADS as u64 - 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn test_distinct_fingerprints_compile_independently() {
    let cache = CompilationCache::new();
    let a = cache.get_or_compile(Fingerprint([1; 32]), || Ok::<_, CompileError>(stub(1))).unwrap();
    let b = cache.get_or_compile(Fingerprint([2; 32]), || Ok::<_, CompileError>(stub(2))).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_failed_compilation_leaves_slot_empty() {
    let cache = CompilationCache::new();
    let key = Fingerprint([3; 32]);

    let err = cache
        .get_or_compile(key, || Err::<CompiledArtifact, _>(CompileError::Backend { message: "out of registers".into() }))
        .unwrap_err();
    assert_eq!(err.to_string(), "out of registers");
    assert!(cache.get(&key).is_none());
    assert_eq!(cache.stats().failures, 1);

    let retried = cache.get_or_compile(key, || Ok::<_, CompileError>(stub(3))).unwrap();
    assert!(Arc::ptr_eq(&retried, &cache.get(&key).unwrap()));
}

#[test]
fn test_hit_skips_compile() {
    let cache = CompilationCache::new();
    let key = Fingerprint([4; 32]);
    let first = cache.get_or_compile(key, || Ok::<_, CompileError>(stub(4))).unwrap();
    let second = cache.get_or_compile(key, || -> Result<CompiledArtifact, CompileError> { panic!("must not compile") }).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_reset_keeps_artifacts_alive() {
    let cache = CompilationCache::new();
    let key = Fingerprint([5; 32]);
    let held = cache.get_or_compile(key, || Ok::<_, CompileError>(stub(5))).unwrap();

    cache.reset();
    assert!(cache.is_empty());
    assert_eq!(held.fingerprint, Fingerprint([5; 32]));

    let recompiled = cache.get_or_compile(key, || Ok::<_, CompileError>(stub(5))).unwrap();
    assert!(!Arc::ptr_eq(&held, &recompiled));
}
