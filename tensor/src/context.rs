//! Runtime context: the state a group of lazy tensors shares.
//!
//! A [`Context`] owns the configuration, the precision controller, the
//! compilation cache, the compiler, the scheduler with its data store, and
//! one [`GraphBuilder`] per logical device. The process-wide context
//! ([`Context::global`]) shares the process-wide precision controller and
//! compilation cache; contexts built with [`Context::builder`] own theirs.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use bon::bon;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use snafu::ResultExt;
use tardy_device::{DeviceDataStore, Element, Literal};
use tardy_dtype::{CanonicalShape, DeviceSpec};
use tardy_ir::{ConstValue, GraphBuilder, LiveRoot, Precision, PrecisionController};
use tardy_runtime::{CompilationCache, Compiler, ReferenceCompiler, RuntimeConfig, Scheduler};
use tracing::info;

use crate::error::*;
use crate::scan::ScanCache;
use crate::tensor::{LazyTensor, TensorCell};

/// Either the process-wide instance or one owned by a context.
#[derive(Debug)]
enum Shared<T: 'static> {
    Process(&'static T),
    Owned(Arc<T>),
}

impl<T: 'static> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Process(value) => value,
            Self::Owned(value) => value,
        }
    }
}

const MIN_PRUNE_HANDLES: usize = 256;

#[derive(Debug)]
struct TrackedCells {
    cells: Vec<Weak<TensorCell>>,
    prune_at: usize,
}

/// Builder and live handles of one logical device.
#[derive(Debug)]
pub(crate) struct DeviceGraph {
    pub(crate) builder: GraphBuilder,
    tensors: Mutex<TrackedCells>,
}

impl DeviceGraph {
    fn new(device: DeviceSpec) -> Self {
        let tensors = TrackedCells { cells: Vec::new(), prune_at: MIN_PRUNE_HANDLES };
        Self { builder: GraphBuilder::new(device), tensors: Mutex::new(tensors) }
    }

    pub(crate) fn register(&self, cell: &Arc<TensorCell>) {
        let root: Weak<dyn LiveRoot> = Arc::downgrade(cell) as Weak<dyn LiveRoot>;
        self.builder.register_root(root);

        let mut tensors = self.tensors.lock();
        if tensors.cells.len() >= tensors.prune_at {
            tensors.cells.retain(|weak| weak.strong_count() > 0);
            tensors.prune_at = (tensors.cells.len() * 2).max(MIN_PRUNE_HANDLES);
        }
        tensors.cells.push(Arc::downgrade(cell));
    }

    /// Live handles that are still unmaterialized.
    pub(crate) fn pending(&self) -> Vec<Arc<TensorCell>> {
        let mut tensors = self.tensors.lock();
        tensors.cells.retain(|weak| weak.strong_count() > 0);
        tensors.cells.iter().filter_map(Weak::upgrade).filter(|cell| cell.pending_node().is_some()).collect()
    }

    /// Tracked handle slots, dropped handles included.
    pub(crate) fn tracked_slots(&self) -> usize {
        self.tensors.lock().cells.len()
    }
}

#[derive(derive_more::Debug)]
pub struct Context {
    config: RwLock<RuntimeConfig>,
    precision: Shared<PrecisionController>,
    cache: Shared<CompilationCache>,
    compiler: Arc<dyn Compiler>,
    scheduler: Scheduler,
    scans: ScanCache,
    #[debug(skip)]
    devices: RwLock<HashMap<DeviceSpec, Arc<DeviceGraph>>>,
}

static GLOBAL: Lazy<Arc<Context>> = Lazy::new(|| {
    let config = RuntimeConfig::from_env();
    PrecisionController::global().set_precision(config.precision);
    Arc::new(Context::from_parts(
        config,
        Shared::Process(PrecisionController::global()),
        Shared::Process(CompilationCache::global()),
        Arc::new(ReferenceCompiler::new()),
    ))
});

#[bon]
impl Context {
    /// Context with its own precision controller and compilation cache.
    ///
    /// The compiler defaults to [`ReferenceCompiler`].
    #[builder]
    pub fn new(#[builder(default)] config: RuntimeConfig, compiler: Option<Arc<dyn Compiler>>) -> Arc<Self> {
        let precision = PrecisionController::with_precision(config.precision);
        let compiler = compiler.unwrap_or_else(|| Arc::new(ReferenceCompiler::new()));
        Arc::new(Self::from_parts(
            config,
            Shared::Owned(Arc::new(precision)),
            Shared::Owned(Arc::new(CompilationCache::new())),
            compiler,
        ))
    }
}

impl Context {
    fn from_parts(
        config: RuntimeConfig,
        precision: Shared<PrecisionController>,
        cache: Shared<CompilationCache>,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            precision,
            cache,
            compiler,
            scheduler: Scheduler::new(Arc::new(DeviceDataStore::new())),
            scans: ScanCache::default(),
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide context, configured from `TARDY_*` variables on first use.
    pub fn global() -> &'static Arc<Context> {
        &GLOBAL
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. Applies its precision mode and empties the
    /// compilation cache and the traced scan bodies.
    pub fn set_config(&self, config: RuntimeConfig) {
        self.precision.set_precision(config.precision);
        *self.config.write() = config;
        self.cache.reset();
        self.scans.clear();
        info!(compiler = self.compiler.name(), "runtime configuration replaced, compilation cache reset");
    }

    pub fn precision(&self) -> Precision {
        self.precision.get_precision()
    }

    /// Switch precision for captures made from now on; returns the previous mode.
    pub fn set_precision(&self, precision: Precision) -> Precision {
        self.precision.set_precision(precision)
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.compiler
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<DeviceDataStore> {
        self.scheduler.store()
    }

    pub(crate) fn scans(&self) -> &ScanCache {
        &self.scans
    }

    /// Pure scan bodies traced and kept for reuse.
    pub fn traced_scan_bodies(&self) -> usize {
        self.scans.len()
    }

    pub(crate) fn device_graph(&self, device: DeviceSpec) -> Arc<DeviceGraph> {
        if let Some(graph) = self.devices.read().get(&device) {
            return Arc::clone(graph);
        }
        Arc::clone(self.devices.write().entry(device).or_insert_with(|| Arc::new(DeviceGraph::new(device))))
    }

    pub(crate) fn existing_graph(&self, device: DeviceSpec) -> Option<Arc<DeviceGraph>> {
        self.devices.read().get(&device).cloned()
    }

    /// Devices that recorded at least one tensor.
    pub fn devices(&self) -> Vec<DeviceSpec> {
        let mut devices: Vec<_> = self.devices.read().keys().copied().collect();
        devices.sort();
        devices
    }

    /// Number of unmaterialized handles alive on `device`.
    pub fn pending_count(&self, device: DeviceSpec) -> usize {
        self.devices.read().get(&device).map_or(0, |graph| graph.pending().len())
    }

    /// Upload `literal` to `device` as a materialized tensor.
    pub fn upload(self: &Arc<Self>, device: DeviceSpec, literal: Literal) -> LazyTensor {
        let logical = literal.dtype();
        let buffer = self.scheduler.upload(device, literal);
        LazyTensor::with_buffer(self, buffer, logical)
    }

    /// Tensor of `values` laid out row-major over `dims`.
    pub fn from_slice<T: Element>(self: &Arc<Self>, device: DeviceSpec, dims: &[usize], values: &[T]) -> Result<LazyTensor> {
        let literal = Literal::from_slice(dims, values).context(DeviceSnafu)?;
        Ok(self.upload(device, literal))
    }

    /// Unmaterialized tensor with every element equal to `value`.
    pub fn full(self: &Arc<Self>, device: DeviceSpec, shape: CanonicalShape, value: ConstValue) -> LazyTensor {
        let logical = shape.dtype();
        let stored = shape.with_dtype(device.storage_policy().storage_dtype(logical));
        let node = self.device_graph(device).builder.constant(value, stored);
        LazyTensor::pending(self, node, logical)
    }
}
