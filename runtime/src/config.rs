//! Runtime configuration.

use std::path::PathBuf;

use bon::bon;
use tardy_ir::Precision;
use tracing::warn;

/// Settings shared by one runtime context.
///
/// A context resets its compilation cache whenever its configuration is
/// replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Precision mode applied at start-up.
    pub precision: Precision,
    /// Append a text dump of every compiled graph to this file.
    pub save_graphs: Option<PathBuf>,
    /// Log sync causes and compiled graph summaries at `info` level.
    pub debug: bool,
    /// Append compilation and execution records to this file.
    pub debug_file: Option<PathBuf>,
}

#[bon]
impl RuntimeConfig {
    /// Start with `RuntimeConfig::builder()`; unset fields take their defaults.
    #[builder]
    pub fn new(
        #[builder(default)] precision: Precision,
        save_graphs: Option<PathBuf>,
        #[builder(default = false)] debug: bool,
        debug_file: Option<PathBuf>,
    ) -> Self {
        Self { precision, save_graphs, debug, debug_file }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TARDY_PRECISION` - `default`, `high` or `highest` (default: `default`)
    /// * `TARDY_SAVE_GRAPHS` - Path receiving graph dumps (default: unset)
    /// * `TARDY_DEBUG` - Verbose sync and compilation logging when `1` or `true`
    /// * `TARDY_DEBUG_FILE` - Path receiving compilation and execution records (default: unset)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let precision = match lookup("TARDY_PRECISION") {
            None => Precision::Default,
            Some(value) => value.parse().unwrap_or_else(|err| {
                warn!(error = %err, "ignoring TARDY_PRECISION");
                Precision::Default
            }),
        };
        let save_graphs = lookup("TARDY_SAVE_GRAPHS").filter(|s| !s.is_empty()).map(PathBuf::from);
        let debug = lookup("TARDY_DEBUG").is_some_and(|s| matches!(s.trim(), "1" | "true" | "TRUE" | "yes"));
        let debug_file = lookup("TARDY_DEBUG_FILE").filter(|s| !s.is_empty()).map(PathBuf::from);

        Self { precision, save_graphs, debug, debug_file }
    }
}
