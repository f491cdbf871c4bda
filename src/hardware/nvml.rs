//! NVIDIA device probe via NVML.

use nvml_wrapper::Nvml;
use nvml_wrapper::error::NvmlError;
use tracing::info;

use super::device::{DeviceProbe, DeviceSnapshot};
use crate::error::{HeimdallError, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Samples free/total memory of one NVIDIA GPU.
pub struct NvmlProbe {
    nvml: Nvml,
    index: u32,
}

impl NvmlProbe {
    /// Initialize NVML for the device at `index`.
    ///
    /// Fails when the driver or library is missing; callers fall back to
    /// [`NoAccelerator`](super::NoAccelerator) explicitly.
    pub fn new(index: u32) -> Result<Self> {
        let nvml = Nvml::init().map_err(|e| match e {
            NvmlError::DriverNotLoaded | NvmlError::LibraryNotFound => {
                HeimdallError::DeviceProbe("NVML not available".to_string())
            }
            other => HeimdallError::DeviceProbe(format!("NVML init error: {other}")),
        })?;

        let count = nvml
            .device_count()
            .map_err(|e| HeimdallError::DeviceProbe(format!("device count: {e}")))?;
        if index >= count {
            return Err(HeimdallError::DeviceProbe(format!(
                "GPU {index} not found ({count} present)"
            )));
        }

        info!(index, count, "NVML probe initialized");
        Ok(Self { nvml, index })
    }
}

impl DeviceProbe for NvmlProbe {
    fn name(&self) -> &str {
        "nvml"
    }

    fn sample(&self) -> Result<Option<DeviceSnapshot>> {
        let device = self
            .nvml
            .device_by_index(self.index)
            .map_err(|e| HeimdallError::DeviceProbe(format!("GPU {}: {e}", self.index)))?;
        let memory = device
            .memory_info()
            .map_err(|e| HeimdallError::DeviceProbe(format!("memory info: {e}")))?;
        let name = device
            .name()
            .unwrap_or_else(|_| format!("nvidia-gpu-{}", self.index));
        let compute_capability = device
            .cuda_compute_capability()
            .ok()
            .map(|cc| (cc.major.max(0) as u32, cc.minor.max(0) as u32));

        Ok(Some(DeviceSnapshot {
            name,
            total_gb: memory.total as f64 / BYTES_PER_GB,
            available_gb: memory.free as f64 / BYTES_PER_GB,
            compute_capability,
        }))
    }
}
