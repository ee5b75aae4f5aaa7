use crate::StoragePolicy;

/// Family of a logical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumIter, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DeviceKind {
    /// Host CPU.
    Cpu,
    /// Tensor processing unit.
    Tpu,
    /// Neuron core.
    Neuron,
}

impl DeviceKind {
    /// How this device family stores wide element types.
    pub const fn storage_policy(self) -> StoragePolicy {
        match self {
            Self::Neuron => StoragePolicy::Reduced,
            Self::Cpu | Self::Tpu => StoragePolicy::Native,
        }
    }
}

/// A logical device: family plus ordinal (`TPU:3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub ordinal: usize,
}

impl DeviceSpec {
    pub const fn new(kind: DeviceKind, ordinal: usize) -> Self {
        Self { kind, ordinal }
    }

    pub const fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, 0)
    }

    pub const fn tpu(ordinal: usize) -> Self {
        Self::new(DeviceKind::Tpu, ordinal)
    }

    pub const fn neuron(ordinal: usize) -> Self {
        Self::new(DeviceKind::Neuron, ordinal)
    }

    pub const fn storage_policy(&self) -> StoragePolicy {
        self.kind.storage_policy()
    }
}

impl std::fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.ordinal)
    }
}
