//! Accelerator memory probes.

use crate::error::Result;

/// One accelerator's memory at sampling time, in GB.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub name: String,
    pub total_gb: f64,
    pub available_gb: f64,
    pub compute_capability: Option<(u32, u32)>,
}

/// Queries an accelerator for its current memory.
///
/// `Ok(None)` means no accelerator is present; `Err` means one may be
/// present but could not be queried. The profiler treats both as CPU-only.
pub trait DeviceProbe: Send + Sync {
    /// Probe name for logging.
    fn name(&self) -> &str;

    fn sample(&self) -> Result<Option<DeviceSnapshot>>;
}

/// Probe for hosts without an accelerator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerator;

impl DeviceProbe for NoAccelerator {
    fn name(&self) -> &str {
        "none"
    }

    fn sample(&self) -> Result<Option<DeviceSnapshot>> {
        Ok(None)
    }
}

/// Probe reporting a configured device budget.
///
/// Useful where the accelerator cannot be queried directly (unified-memory
/// machines, containers without driver access) but its size is known.
#[derive(Debug, Clone)]
pub struct FixedDevice {
    name: String,
    memory_gb: f64,
}

impl FixedDevice {
    pub fn new(name: impl Into<String>, memory_gb: f64) -> Self {
        Self {
            name: name.into(),
            memory_gb: memory_gb.max(0.0),
        }
    }
}

impl DeviceProbe for FixedDevice {
    fn name(&self) -> &str {
        "fixed"
    }

    fn sample(&self) -> Result<Option<DeviceSnapshot>> {
        Ok(Some(DeviceSnapshot {
            name: self.name.clone(),
            total_gb: self.memory_gb,
            available_gb: self.memory_gb,
            compute_capability: None,
        }))
    }
}
