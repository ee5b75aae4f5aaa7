//! Process and thread topology.
//!
//! Read once at start-up from `TARDY_*` variables. A process owns
//! `device_count` logical devices; its replicas are numbered globally as
//! `process_rank * device_count + local_index`.

use bon::bon;
use snafu::ensure;
use tardy_dtype::{DeviceKind, DeviceSpec};
use tracing::debug;

use crate::error::*;

/// Accelerator generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Accelerator {
    #[strum(serialize = "tpu-v2")]
    TpuV2,
    #[strum(serialize = "tpu-v3")]
    TpuV3,
    #[strum(serialize = "tpu-v4")]
    TpuV4,
    #[strum(serialize = "tpu-v5e")]
    TpuV5e,
    #[strum(serialize = "tpu-v5p")]
    TpuV5p,
    #[strum(serialize = "neuron")]
    Neuron,
    #[strum(serialize = "cpu")]
    Cpu,
}

/// How logical devices map onto OS execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    /// One process holds a whole package; each logical core runs on its own
    /// thread inside it. Workers must not rely on process-global state.
    ProcessPerChip { cores_per_chip: usize },
    /// Every logical device is driven independently.
    ProcessPerDevice,
}

impl Accelerator {
    pub const fn regime(self) -> Regime {
        match self {
            Self::TpuV2 | Self::TpuV3 => Regime::ProcessPerChip { cores_per_chip: 2 },
            Self::TpuV4 | Self::TpuV5e | Self::TpuV5p | Self::Neuron | Self::Cpu => Regime::ProcessPerDevice,
        }
    }

    pub const fn device_kind(self) -> DeviceKind {
        match self {
            Self::Neuron => DeviceKind::Neuron,
            Self::Cpu => DeviceKind::Cpu,
            _ => DeviceKind::Tpu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Logical devices owned by this process.
    pub device_count: usize,
    pub process_rank: usize,
    /// Number of processes.
    pub world_size: usize,
    /// `host:port` of the coordination service; required with several processes.
    pub coordinator: Option<String>,
    pub accelerator: Accelerator,
}

#[bon]
impl TopologyConfig {
    #[builder]
    pub fn new(
        device_count: usize,
        accelerator: Accelerator,
        #[builder(default = 0)] process_rank: usize,
        #[builder(default = 1)] world_size: usize,
        coordinator: Option<String>,
    ) -> Result<Self> {
        let config = Self { device_count, process_rank, world_size, coordinator, accelerator };
        config.validate()?;
        Ok(config)
    }
}

impl TopologyConfig {
    /// Single process driving `device_count` host devices.
    pub fn local(device_count: usize) -> Self {
        Self { device_count, process_rank: 0, world_size: 1, coordinator: None, accelerator: Accelerator::Cpu }
    }

    /// Read the topology from the environment.
    ///
    /// # Environment Variables
    ///
    /// * `TARDY_DEVICE_COUNT` - Logical devices in this process (required)
    /// * `TARDY_ACCELERATOR` - Generation, e.g. `tpu-v3`, `tpu-v4`, `neuron`, `cpu` (required)
    /// * `TARDY_PROCESS_RANK` - This process's rank (default: 0)
    /// * `TARDY_WORLD_SIZE` - Number of processes (default: 1)
    /// * `TARDY_COORDINATOR` - `host:port`, required when `TARDY_WORLD_SIZE` > 1
    ///
    /// # Errors
    ///
    /// [`Error::TopologyConfig`] naming the first missing or malformed variable.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |variable: &'static str| {
            lookup(variable).filter(|v| !v.trim().is_empty()).ok_or_else(|| Error::TopologyConfig {
                variable,
                reason: "not set".into(),
            })
        };
        let number = |variable: &'static str, value: String| {
            value.trim().parse::<usize>().map_err(|err| Error::TopologyConfig {
                variable,
                reason: format!("{value:?} is not a count: {err}"),
            })
        };

        let device_count = number("TARDY_DEVICE_COUNT", required("TARDY_DEVICE_COUNT")?)?;
        let accelerator = required("TARDY_ACCELERATOR")?;
        let accelerator = accelerator.trim().parse::<Accelerator>().map_err(|_| Error::TopologyConfig {
            variable: "TARDY_ACCELERATOR",
            reason: format!("unknown accelerator {accelerator:?}"),
        })?;
        let process_rank = match lookup("TARDY_PROCESS_RANK") {
            Some(value) => number("TARDY_PROCESS_RANK", value)?,
            None => 0,
        };
        let world_size = match lookup("TARDY_WORLD_SIZE") {
            Some(value) => number("TARDY_WORLD_SIZE", value)?,
            None => 1,
        };
        let coordinator = lookup("TARDY_COORDINATOR").map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let config = Self { device_count, process_rank, world_size, coordinator, accelerator };
        config.validate()?;
        debug!(
            topology.devices = config.device_count,
            topology.rank = config.process_rank,
            topology.world = config.world_size,
            accelerator = %config.accelerator,
            "topology configured"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.device_count > 0,
            TopologyConfigSnafu { variable: "TARDY_DEVICE_COUNT", reason: "must be at least 1" }
        );
        ensure!(self.world_size > 0, TopologyConfigSnafu { variable: "TARDY_WORLD_SIZE", reason: "must be at least 1" });
        ensure!(
            self.process_rank < self.world_size,
            TopologyConfigSnafu {
                variable: "TARDY_PROCESS_RANK",
                reason: format!("rank {} outside a world of {}", self.process_rank, self.world_size),
            }
        );
        if let Regime::ProcessPerChip { cores_per_chip } = self.regime() {
            ensure!(
                self.device_count % cores_per_chip == 0,
                TopologyConfigSnafu {
                    variable: "TARDY_DEVICE_COUNT",
                    reason: format!("{} owns whole chips of {cores_per_chip} cores", self.accelerator),
                }
            );
        }
        if self.world_size > 1 {
            let Some(coordinator) = &self.coordinator else {
                return TopologyConfigSnafu { variable: "TARDY_COORDINATOR", reason: "required with several processes" }
                    .fail();
            };
            let port = coordinator.rsplit_once(':').and_then(|(host, port)| (!host.is_empty()).then_some(port));
            ensure!(
                port.is_some_and(|p| p.parse::<u16>().is_ok()),
                TopologyConfigSnafu { variable: "TARDY_COORDINATOR", reason: format!("{coordinator:?} is not host:port") }
            );
        }
        Ok(())
    }

    pub fn regime(&self) -> Regime {
        self.accelerator.regime()
    }

    /// Replicas across all processes.
    pub fn replica_count(&self) -> usize {
        self.device_count * self.world_size
    }

    /// Devices owned by this process, by local ordinal.
    pub fn local_devices(&self) -> Vec<DeviceSpec> {
        let kind = self.accelerator.device_kind();
        (0..self.device_count).map(|ordinal| DeviceSpec::new(kind, ordinal)).collect()
    }

    /// Global replica index of local device `local_index`.
    pub fn replica_index(&self, local_index: usize) -> usize {
        self.process_rank * self.device_count + local_index
    }
}
