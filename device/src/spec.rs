pub use tardy_dtype::{DeviceKind, DeviceSpec};

use crate::error::{InvalidDeviceSnafu, Result};

/// Extension trait for DeviceSpec to add parsing functionality.
pub trait DeviceSpecExt {
    /// Parse a device string into a DeviceSpec.
    ///
    /// Examples:
    /// - "CPU" -> `CPU:0`
    /// - "TPU:3" -> `TPU:3`
    /// - "xla:1" -> `TPU:1`
    /// - "neuron" -> `NEURON:0` (default to ordinal 0)
    fn parse(s: &str) -> Result<DeviceSpec>;
}

impl DeviceSpecExt for DeviceSpec {
    fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let (family, ordinal) = match upper.split_once(':') {
            Some((family, ordinal)) => {
                let ordinal = ordinal.parse().map_err(|_| InvalidDeviceSnafu { device: s }.build())?;
                (family, ordinal)
            }
            None => (upper.as_str(), 0),
        };

        let kind = match family {
            "CPU" => DeviceKind::Cpu,
            "TPU" | "XLA" => DeviceKind::Tpu,
            "NEURON" => DeviceKind::Neuron,
            _ => return InvalidDeviceSnafu { device: s }.fail(),
        };
        Ok(DeviceSpec::new(kind, ordinal))
    }
}
