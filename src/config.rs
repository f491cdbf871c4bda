//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (CLI flag)
//! 2. `~/.heimdall/config.toml` (user)
//! 3. `/etc/heimdall/config.toml` (system)
//!
//! With no file anywhere the defaults apply: live hardware probing, the
//! stock quantization table, the `conversational`/`art` groups and the
//! embedded model catalog.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::balancer::{WorkingSetGroup, default_groups};
use crate::hardware::{DeviceProbe, FixedDevice, HardwareProfiler, NoAccelerator, SystemProfiler};
use crate::quantization::{QuantizationFactors, QuantizationStrategy};
use crate::registry::ModelRegistry;
use crate::{HeimdallError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub quantization: QuantizationFactors,
    #[serde(default = "default_groups")]
    pub groups: Vec<WorkingSetGroup>,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hardware: HardwareConfig::default(),
            quantization: QuantizationFactors::default(),
            groups: default_groups(),
            workers: WorkersConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

/// How the accelerator is discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Probe the first NVIDIA device when built with `nvml`, else CPU-only.
    #[default]
    Auto,
    /// Never report device memory.
    None,
    /// Report a fixed device of `device_memory_gb`.
    Fixed,
}

/// Hardware budget configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub device: DeviceMode,
    /// Device size for `device = "fixed"`.
    #[serde(default)]
    pub device_memory_gb: Option<f64>,
    /// Device name for `device = "fixed"` (default: "fixed-device").
    #[serde(default)]
    pub device_name: Option<String>,
    /// Host memory held back from the budget.
    #[serde(default)]
    pub host_memory_reserve_gb: f64,
    /// Device memory held back from the budget.
    #[serde(default)]
    pub device_memory_reserve_gb: f64,
}

/// Worker supervision.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Bounded wait per worker during shutdown (default: 5).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_shutdown_timeout() -> u64 {
    5
}

/// Extra catalog entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// JSON catalog merged over the embedded seed.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist; otherwise the first of
    /// `~/.heimdall/config.toml` and `/etc/heimdall/config.toml` that exists
    /// is used, falling back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            debug!("no config file found, using defaults");
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            HeimdallError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| HeimdallError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let hw = &self.hardware;
        if hw.device == DeviceMode::Fixed {
            match hw.device_memory_gb {
                Some(gb) if gb.is_finite() && gb >= 0.0 => {}
                Some(gb) => {
                    return Err(HeimdallError::Configuration(format!(
                        "hardware.device_memory_gb must be a non-negative number, got {gb}"
                    )));
                }
                None => {
                    return Err(HeimdallError::Configuration(
                        "hardware.device = \"fixed\" requires device_memory_gb".to_string(),
                    ));
                }
            }
        }
        for (key, value) in [
            ("host_memory_reserve_gb", hw.host_memory_reserve_gb),
            ("device_memory_reserve_gb", hw.device_memory_reserve_gb),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(HeimdallError::Configuration(format!(
                    "hardware.{key} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve the config file path, if any.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HeimdallError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".heimdall").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/heimdall/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Profiler for the configured hardware mode.
    pub fn build_profiler(&self) -> Arc<dyn HardwareProfiler> {
        let hw = &self.hardware;
        let device: Box<dyn DeviceProbe> = match hw.device {
            DeviceMode::None => Box::new(NoAccelerator),
            DeviceMode::Fixed => Box::new(FixedDevice::new(
                hw.device_name.as_deref().unwrap_or("fixed-device"),
                hw.device_memory_gb.unwrap_or(0.0),
            )),
            DeviceMode::Auto => auto_probe(),
        };
        Arc::new(
            SystemProfiler::new(device)
                .with_host_reserve(hw.host_memory_reserve_gb)
                .with_device_reserve(hw.device_memory_reserve_gb),
        )
    }

    /// Quantization strategy with the configured factor overrides.
    pub fn build_strategy(&self) -> QuantizationStrategy {
        QuantizationStrategy::new().with_factors(&self.quantization)
    }

    /// Embedded catalog plus the configured catalog file, if any.
    pub fn build_registry(&self) -> Result<ModelRegistry> {
        let mut registry = ModelRegistry::with_embedded_seed();
        if let Some(path) = &self.catalog.path {
            let added = registry.load_file(path).map_err(|e| {
                HeimdallError::Configuration(format!("Failed to load catalog {path:?}: {e}"))
            })?;
            debug!(path = ?path, added, "loaded catalog file");
        }
        Ok(registry)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.shutdown_timeout_secs)
    }
}

#[cfg(feature = "nvml")]
fn auto_probe() -> Box<dyn DeviceProbe> {
    match crate::hardware::NvmlProbe::new(0) {
        Ok(probe) => Box::new(probe),
        Err(e) => {
            warn!(error = %e, "NVML unavailable, running CPU-only");
            Box::new(NoAccelerator)
        }
    }
}

#[cfg(not(feature = "nvml"))]
fn auto_probe() -> Box<dyn DeviceProbe> {
    warn!("built without nvml support, running CPU-only");
    Box::new(NoAccelerator)
}
