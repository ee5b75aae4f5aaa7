//! Compilation cache with per-fingerprint single flight.
//!
//! Maps a graph [`Fingerprint`] to its compiled artifact. Each fingerprint
//! owns a [`OnceCell`] slot in a papaya map:
//!
//! - concurrent callers for one fingerprint block on the slot while exactly
//!   one of them compiles
//! - different fingerprints compile in parallel; nothing serializes the map
//! - a failed compilation leaves its slot empty, so a later call retries
//!
//! Artifacts are handed out as `Arc`s; [`CompilationCache::reset`] drops the
//! cache's references only, running dispatches keep theirs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::{Lazy, OnceCell};
use papaya::{Compute, HashMap, Operation};
use tardy_ir::Fingerprint;
use tracing::{debug, trace};

use crate::compiler::CompiledArtifact;
use crate::metrics::metrics;

type Slot = Arc<OnceCell<Arc<CompiledArtifact>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served by an existing or in-flight artifact.
    pub hits: u64,
    /// Lookups that ran the compile function.
    pub misses: u64,
    /// Compile functions that returned an error.
    pub failures: u64,
    /// Fingerprints with a compiled artifact.
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct CompilationCache {
    slots: HashMap<Fingerprint, Slot>,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

static GLOBAL: Lazy<CompilationCache> = Lazy::new(CompilationCache::new);

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    fn slot(&self, fingerprint: Fingerprint) -> Slot {
        let guard = self.slots.guard();

        // Fast path: slot exists
        if let Some(slot) = self.slots.get(&fingerprint, &guard) {
            return Arc::clone(slot);
        }

        let fresh: Slot = Arc::new(OnceCell::new());
        match self.slots.compute(
            fingerprint,
            |entry| match entry {
                Some((_, existing)) => Operation::Abort(Arc::clone(existing)),
                None => Operation::Insert(Arc::clone(&fresh)),
            },
            &guard,
        ) {
            Compute::Inserted(_, slot) => Arc::clone(slot),
            Compute::Aborted(slot) => slot,
            _ => fresh,
        }
    }

    /// Artifact for `fingerprint`, running `compile` only if no artifact
    /// exists and no other caller is compiling it.
    ///
    /// # Errors
    ///
    /// The error of `compile`, reported to the caller that ran it. Callers
    /// waiting on that attempt then retry with their own `compile`.
    pub fn get_or_compile<F, E>(&self, fingerprint: Fingerprint, compile: F) -> Result<Arc<CompiledArtifact>, E>
    where
        F: FnOnce() -> Result<CompiledArtifact, E>,
    {
        let slot = self.slot(fingerprint);
        if let Some(artifact) = slot.get() {
            self.record_hit(fingerprint);
            return Ok(Arc::clone(artifact));
        }

        let mut compiled_here = false;
        let result = slot.get_or_try_init(|| {
            compiled_here = true;
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(graph.hash = %fingerprint.short(), cache.hit = false, "compiling graph");
            compile().map(Arc::new)
        });

        match result {
            Ok(artifact) => {
                if compiled_here {
                    metrics().compilations.inc();
                } else {
                    self.record_hit(fingerprint);
                }
                Ok(Arc::clone(artifact))
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(graph.hash = %fingerprint.short(), "compilation failed, slot left empty");
                Err(err)
            }
        }
    }

    fn record_hit(&self, fingerprint: Fingerprint) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics().cache_hits.inc();
        trace!(graph.hash = %fingerprint.short(), cache.hit = true, "compilation cache hit");
    }

    /// Compiled artifact, if present. Never compiles or waits.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CompiledArtifact>> {
        let guard = self.slots.guard();
        self.slots.get(fingerprint, &guard).and_then(|slot| slot.get().cloned())
    }

    /// Number of fingerprints with a compiled artifact.
    pub fn len(&self) -> usize {
        let guard = self.slots.guard();
        self.slots.iter(&guard).filter(|(_, slot)| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Artifacts held elsewhere stay alive.
    pub fn reset(&self) {
        let guard = self.slots.guard();
        self.slots.clear(&guard);
        debug!("compilation cache reset");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}
