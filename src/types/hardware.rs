//! Point-in-time hardware snapshot.

use serde::{Deserialize, Serialize};

/// Memory and capability snapshot of the local machine.
///
/// Sampled fresh on every query and never mutated in place; callers that
/// need a stable view hold on to the returned value. Memory is in GB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub total_device_memory_gb: f64,
    pub available_device_memory_gb: f64,
    pub total_host_memory_gb: f64,
    pub available_host_memory_gb: f64,
    pub accelerator_available: bool,
    /// `(major, minor)` compute capability, when the accelerator reports one.
    pub compute_capability: Option<(u32, u32)>,
    pub device_name: String,
    pub logical_cpu_count: usize,
    pub platform: String,
}

impl HardwareProfile {
    /// A profile with no accelerator: device memory is zero, so no
    /// device-resident model can be admitted.
    pub fn cpu_only(total_host_gb: f64, available_host_gb: f64) -> Self {
        Self {
            total_device_memory_gb: 0.0,
            available_device_memory_gb: 0.0,
            total_host_memory_gb: total_host_gb,
            available_host_memory_gb: available_host_gb.min(total_host_gb),
            accelerator_available: false,
            compute_capability: None,
            device_name: "cpu".to_string(),
            logical_cpu_count: 1,
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Set the device memory, clamping `available` to `total`.
    pub fn with_device(mut self, name: impl Into<String>, total_gb: f64, available_gb: f64) -> Self {
        self.accelerator_available = true;
        self.device_name = name.into();
        self.total_device_memory_gb = total_gb.max(0.0);
        self.available_device_memory_gb = available_gb.clamp(0.0, self.total_device_memory_gb);
        self
    }

    pub fn with_compute_capability(mut self, major: u32, minor: u32) -> Self {
        self.compute_capability = Some((major, minor));
        self
    }

    pub fn with_cpu_count(mut self, count: usize) -> Self {
        self.logical_cpu_count = count;
        self
    }

    /// Whether any model can be placed on the accelerator.
    pub fn has_device_memory(&self) -> bool {
        self.accelerator_available && self.available_device_memory_gb > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_only_has_no_device_memory() {
        let profile = HardwareProfile::cpu_only(32.0, 20.0);
        assert!(!profile.accelerator_available);
        assert!(!profile.has_device_memory());
        assert_eq!(profile.available_device_memory_gb, 0.0);
    }

    #[test]
    fn with_device_clamps_available() {
        let profile = HardwareProfile::cpu_only(32.0, 20.0).with_device("gpu", 8.0, 12.0);
        assert_eq!(profile.available_device_memory_gb, 8.0);
        assert!(profile.has_device_memory());
    }
}
