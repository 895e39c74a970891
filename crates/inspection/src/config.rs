//! Station configuration
//!
//! Loaded from an optional TOML/JSON/YAML file layered with `AOI__`-prefixed
//! environment variables, e.g. `AOI__ENGINE__BASE_URL=http://engine:8000` or
//! `AOI__HARDWARE__SETTLE_DELAY_MS=2500`.

use ::config::{Config, ConfigError, Environment, File};
use camera_pipeline::HardwareConfig;
use inspection_engine::{EngineConfig, LinkerConfig};
use roi_config::ValidationLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Per-cycle limits for remote calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Upper bound for one engine evaluation (ms)
    pub engine_timeout_ms: u64,
    /// Upper bound for one barcode link (ms)
    pub link_timeout_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            engine_timeout_ms: 60_000,
            link_timeout_ms: 5000,
        }
    }
}

impl CycleConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }
}

/// Complete station configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub hardware: HardwareConfig,
    pub engine: EngineConfig,
    /// Barcode linking is skipped when absent
    pub linker: Option<LinkerConfig>,
    pub cycle: CycleConfig,
    pub limits: ValidationLimits,
}

impl StationConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config: StationConfig = builder
            .add_source(
                Environment::with_prefix("AOI")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        info!(
            backend = ?config.hardware.backend,
            driver = ?config.hardware.driver,
            engine = %config.engine.inspect_url(),
            linking = config.linker.is_some(),
            "Station configuration loaded"
        );
        Ok(config)
    }
}
