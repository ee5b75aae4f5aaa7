//! Matrix-multiply precision modes.
//!
//! Accelerator matrix units multiply in bfloat16. Higher modes split each
//! f32 operand into bfloat16 pieces and sum several partial products, trading
//! throughput for accuracy. The mode is process-wide state owned by the
//! [`PrecisionController`]; everything downstream takes it as a plain
//! [`Precision`] argument.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::{Error, UnknownPrecisionSnafu};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter, strum::FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Precision {
    /// One bf16 pass.
    #[default]
    Default = 0,
    /// Three bf16 passes.
    High = 1,
    /// Six bf16 passes, close to full f32.
    Highest = 2,
}

impl Precision {
    /// bf16 partial products per multiply.
    pub const fn passes(self) -> usize {
        match self {
            Self::Default => 1,
            Self::High => 3,
            Self::Highest => 6,
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }
}

impl std::str::FromStr for Precision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "high" => Ok(Self::High),
            "highest" => Ok(Self::Highest),
            _ => UnknownPrecisionSnafu { value: s }.fail(),
        }
    }
}

/// Holder of the active precision mode.
///
/// Changing the mode affects captures fingerprinted afterwards; artifacts
/// compiled under another mode stay cached under their own fingerprints.
#[derive(Debug, Default)]
pub struct PrecisionController {
    mode: AtomicU8,
    generation: AtomicU64,
}

static GLOBAL: Lazy<PrecisionController> = Lazy::new(PrecisionController::new);

impl PrecisionController {
    pub const fn new() -> Self {
        Self { mode: AtomicU8::new(Precision::Default as u8), generation: AtomicU64::new(0) }
    }

    pub const fn with_precision(precision: Precision) -> Self {
        Self { mode: AtomicU8::new(precision as u8), generation: AtomicU64::new(0) }
    }

    /// The process-lifetime instance.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    pub fn get_precision(&self) -> Precision {
        Precision::from_repr(self.mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Switch modes, returning the previous one.
    pub fn set_precision(&self, precision: Precision) -> Precision {
        let previous = Precision::from_repr(self.mode.swap(precision as u8, Ordering::AcqRel)).unwrap_or_default();
        if previous != precision {
            self.generation.fetch_add(1, Ordering::AcqRel);
            debug!(precision.previous = %previous, precision.current = %precision, "precision mode changed");
        }
        previous
    }

    pub fn reset(&self) {
        self.set_precision(Precision::Default);
    }

    /// Incremented on every actual mode change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
