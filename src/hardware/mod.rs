//! Hardware capability probing.
//!
//! A [`HardwareProfiler`] produces a fresh [`HardwareProfile`] on every call.
//! Host memory and CPU count come from `sysinfo`; device memory comes from a
//! pluggable [`DeviceProbe`]. Probing never fails outright: an accelerator
//! that cannot be queried is reported as absent, with zero device memory.

pub mod device;
#[cfg(feature = "nvml")]
pub mod nvml;

use std::sync::RwLock;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, warn};

use crate::types::HardwareProfile;

pub use device::{DeviceProbe, DeviceSnapshot, FixedDevice, NoAccelerator};
#[cfg(feature = "nvml")]
pub use nvml::NvmlProbe;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of hardware snapshots.
pub trait HardwareProfiler: Send + Sync {
    /// Sample current device/host memory and capability. No caching.
    fn get_profile(&self) -> HardwareProfile;
}

/// Profiler backed by the live system.
pub struct SystemProfiler {
    device: Box<dyn DeviceProbe>,
    host_reserve_gb: f64,
    device_reserve_gb: f64,
}

impl SystemProfiler {
    /// Create a profiler using the given device probe.
    pub fn new(device: Box<dyn DeviceProbe>) -> Self {
        Self {
            device,
            host_reserve_gb: 0.0,
            device_reserve_gb: 0.0,
        }
    }

    /// Profiler for a machine without a usable accelerator.
    pub fn cpu_only() -> Self {
        Self::new(Box::new(NoAccelerator))
    }

    /// Hold back host memory from the reported available budget.
    pub fn with_host_reserve(mut self, gb: f64) -> Self {
        self.host_reserve_gb = gb.max(0.0);
        self
    }

    /// Hold back device memory from the reported available budget.
    pub fn with_device_reserve(mut self, gb: f64) -> Self {
        self.device_reserve_gb = gb.max(0.0);
        self
    }
}

impl HardwareProfiler for SystemProfiler {
    fn get_profile(&self) -> HardwareProfile {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::nothing()),
        );

        let total_host = system.total_memory() as f64 / BYTES_PER_GB;
        let available_host =
            (system.available_memory() as f64 / BYTES_PER_GB - self.host_reserve_gb).max(0.0);
        let platform =
            System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string());

        let mut profile = HardwareProfile::cpu_only(total_host, available_host)
            .with_cpu_count(system.cpus().len().max(1));
        profile.platform = platform;

        match self.device.sample() {
            Ok(Some(snapshot)) => {
                let available = (snapshot.available_gb - self.device_reserve_gb).max(0.0);
                profile = profile.with_device(snapshot.name, snapshot.total_gb, available);
                if let Some((major, minor)) = snapshot.compute_capability {
                    profile = profile.with_compute_capability(major, minor);
                }
            }
            Ok(None) => {
                debug!(probe = self.device.name(), "no accelerator present");
            }
            Err(e) => {
                warn!(
                    probe = self.device.name(),
                    error = %e,
                    "device probe failed, reporting CPU-only"
                );
            }
        }

        profile
    }
}

/// Profiler returning a caller-controlled snapshot.
///
/// Used for tests and for hosts whose budget is fixed by configuration.
/// The snapshot can be replaced at any time to simulate memory pressure.
#[derive(Debug)]
pub struct StaticProfiler {
    profile: RwLock<HardwareProfile>,
}

impl StaticProfiler {
    pub fn new(profile: HardwareProfile) -> Self {
        Self {
            profile: RwLock::new(profile),
        }
    }

    /// Shorthand for a machine with one accelerator and the given budgets.
    pub fn with_budget(device_gb: f64, host_gb: f64) -> Self {
        Self::new(
            HardwareProfile::cpu_only(host_gb, host_gb)
                .with_device("test-device", device_gb, device_gb),
        )
    }

    /// Replace the snapshot returned by subsequent samples.
    pub fn set_profile(&self, profile: HardwareProfile) {
        match self.profile.write() {
            Ok(mut guard) => *guard = profile,
            Err(poisoned) => *poisoned.into_inner() = profile,
        }
    }

    /// Change only the available device memory.
    pub fn set_available_device_gb(&self, gb: f64) {
        let mut profile = self.get_profile();
        profile.available_device_memory_gb = gb.clamp(0.0, profile.total_device_memory_gb);
        self.set_profile(profile);
    }
}

impl HardwareProfiler for StaticProfiler {
    fn get_profile(&self) -> HardwareProfile {
        match self.profile.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
