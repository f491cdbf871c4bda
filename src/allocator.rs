//! Memory reservation ledger.
//!
//! The [`MemoryAllocator`] owns the only long-lived mutable state in the
//! resource core: the table of committed reservations. Every
//! check-then-commit runs inside a single critical section, so two callers
//! can never both observe the same headroom and over-commit it.
//!
//! Reservations are admitted against the device budget sampled at commit
//! time. Older reservations are not re-validated when available memory
//! later shrinks for reasons the ledger did not cause.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;

use crate::error::Rejection;
use crate::hardware::HardwareProfiler;
use crate::telemetry;
use crate::types::QuantizationLevel;

/// A committed reservation for one model.
///
/// Only the allocator creates or removes these; callers get clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub model_id: String,
    pub reserved_device_memory_gb: f64,
    pub reserved_host_memory_gb: f64,
    pub quantization: QuantizationLevel,
    pub created_at: SystemTime,
}

/// Ledger of reservations keyed by model id.
pub struct MemoryAllocator {
    profiler: Arc<dyn HardwareProfiler>,
    ledger: Mutex<HashMap<String, Allocation>>,
}

impl MemoryAllocator {
    /// Create an empty ledger whose ceiling comes from `profiler`.
    pub fn new(profiler: Arc<dyn HardwareProfiler>) -> Self {
        Self {
            profiler,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    // The ledger holds plain data and every mutation is a single insert or
    // remove, so a poisoned lock still guards a consistent table.
    fn ledger(&self) -> MutexGuard<'_, HashMap<String, Allocation>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit a reservation for `model_id`.
    ///
    /// Rejected with [`Rejection::AlreadyReserved`] when the id already
    /// holds a reservation, with [`Rejection::AllocationConflict`] when
    /// `device_gb` exceeds the device budget not already committed, and with
    /// [`Rejection::InsufficientHostMemory`] when `host_gb` exceeds the
    /// uncommitted host budget.
    pub fn reserve(
        &self,
        model_id: &str,
        device_gb: f64,
        host_gb: f64,
        quantization: QuantizationLevel,
    ) -> Result<Allocation, Rejection> {
        let mut ledger = self.ledger();

        if ledger.contains_key(model_id) {
            debug!(model = model_id, "reservation rejected: already reserved");
            return Err(Rejection::AlreadyReserved(model_id.to_string()));
        }

        let profile = self.profiler.get_profile();
        let (committed_device, committed_host) = Self::committed(&ledger);

        let uncommitted = (profile.available_device_memory_gb - committed_device).max(0.0);
        if device_gb > uncommitted {
            debug!(
                model = model_id,
                requested_gb = device_gb,
                uncommitted_gb = uncommitted,
                "reservation rejected"
            );
            return Err(Rejection::AllocationConflict {
                requested_gb: device_gb,
                uncommitted_gb: uncommitted,
            });
        }

        let uncommitted_host = (profile.available_host_memory_gb - committed_host).max(0.0);
        if host_gb > uncommitted_host {
            debug!(
                model = model_id,
                requested_gb = host_gb,
                uncommitted_gb = uncommitted_host,
                "reservation rejected: host memory"
            );
            return Err(Rejection::InsufficientHostMemory {
                required_gb: host_gb,
                available_gb: uncommitted_host,
            });
        }

        let allocation = Allocation {
            model_id: model_id.to_string(),
            reserved_device_memory_gb: device_gb,
            reserved_host_memory_gb: host_gb,
            quantization,
            created_at: SystemTime::now(),
        };
        ledger.insert(model_id.to_string(), allocation.clone());
        Self::record_committed(&ledger);

        debug!(
            model = model_id,
            device_gb,
            host_gb,
            %quantization,
            "reservation committed"
        );
        Ok(allocation)
    }

    /// Remove the reservation for `model_id`.
    ///
    /// Idempotent: releasing an unknown id is a no-op and returns `None`.
    pub fn release(&self, model_id: &str) -> Option<Allocation> {
        let mut ledger = self.ledger();
        let released = ledger.remove(model_id);
        if released.is_some() {
            metrics::counter!(telemetry::RELEASES_TOTAL).increment(1);
            Self::record_committed(&ledger);
            debug!(model = model_id, "reservation released");
        }
        released
    }

    /// Total device memory held by live reservations.
    pub fn committed_device_gb(&self) -> f64 {
        self.ledger()
            .values()
            .map(|a| a.reserved_device_memory_gb)
            .sum()
    }

    /// Total host memory held by live reservations.
    pub fn committed_host_gb(&self) -> f64 {
        self.ledger()
            .values()
            .map(|a| a.reserved_host_memory_gb)
            .sum()
    }

    /// Device memory available now and not committed to any reservation.
    pub fn uncommitted_device_gb(&self) -> f64 {
        let available = self.profiler.get_profile().available_device_memory_gb;
        (available - self.committed_device_gb()).max(0.0)
    }

    /// Reservation for one model, if any.
    pub fn get(&self, model_id: &str) -> Option<Allocation> {
        self.ledger().get(model_id).cloned()
    }

    /// Snapshot of the ledger, sorted by model id.
    pub fn allocations(&self) -> Vec<Allocation> {
        let mut snapshot: Vec<Allocation> = self.ledger().values().cloned().collect();
        snapshot.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        snapshot
    }

    fn committed(ledger: &HashMap<String, Allocation>) -> (f64, f64) {
        ledger.values().fold((0.0, 0.0), |(d, h), a| {
            (d + a.reserved_device_memory_gb, h + a.reserved_host_memory_gb)
        })
    }

    fn record_committed(ledger: &HashMap<String, Allocation>) {
        let (device, host) = Self::committed(ledger);
        metrics::gauge!(telemetry::COMMITTED_DEVICE_GB).set(device);
        metrics::gauge!(telemetry::COMMITTED_HOST_GB).set(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::StaticProfiler;

    fn allocator(device_gb: f64) -> MemoryAllocator {
        MemoryAllocator::new(Arc::new(StaticProfiler::with_budget(device_gb, 64.0)))
    }

    #[test]
    fn reserve_within_budget() {
        let alloc = allocator(8.0);
        let a = alloc
            .reserve("a", 5.0, 2.0, QuantizationLevel::Fp16)
            .unwrap();
        assert_eq!(a.model_id, "a");
        assert_eq!(alloc.committed_device_gb(), 5.0);
        assert_eq!(alloc.committed_host_gb(), 2.0);
        assert_eq!(alloc.uncommitted_device_gb(), 3.0);
    }

    #[test]
    fn reserve_beyond_uncommitted_is_conflict() {
        let alloc = allocator(8.0);
        alloc.reserve("a", 5.0, 0.0, QuantizationLevel::Fp32).unwrap();
        let err = alloc
            .reserve("b", 4.0, 0.0, QuantizationLevel::Fp32)
            .unwrap_err();
        assert_eq!(
            err,
            Rejection::AllocationConflict {
                requested_gb: 4.0,
                uncommitted_gb: 3.0
            }
        );
        assert!(alloc.get("b").is_none());
    }

    #[test]
    fn re_reserving_same_id_is_rejected() {
        let alloc = allocator(8.0);
        alloc.reserve("a", 2.0, 0.0, QuantizationLevel::Fp32).unwrap();
        let err = alloc
            .reserve("a", 1.0, 0.0, QuantizationLevel::Int8)
            .unwrap_err();
        assert_eq!(err, Rejection::AlreadyReserved("a".to_string()));
        assert_eq!(alloc.committed_device_gb(), 2.0);
        assert_eq!(alloc.get("a").unwrap().quantization, QuantizationLevel::Fp32);
    }

    #[test]
    fn reserve_beyond_uncommitted_host_is_rejected() {
        let alloc = MemoryAllocator::new(Arc::new(StaticProfiler::with_budget(8.0, 4.0)));
        alloc.reserve("a", 1.0, 3.0, QuantizationLevel::Int8).unwrap();
        let err = alloc
            .reserve("b", 1.0, 2.0, QuantizationLevel::Int8)
            .unwrap_err();
        assert_eq!(
            err,
            Rejection::InsufficientHostMemory {
                required_gb: 2.0,
                available_gb: 1.0
            }
        );
        assert!(alloc.get("b").is_none());
        assert_eq!(alloc.committed_host_gb(), 3.0);
    }

    #[test]
    fn release_is_idempotent() {
        let alloc = allocator(8.0);
        alloc.reserve("a", 2.0, 1.0, QuantizationLevel::Int8).unwrap();
        assert!(alloc.release("a").is_some());
        assert!(alloc.release("a").is_none());
        assert!(alloc.release("never-reserved").is_none());
        assert_eq!(alloc.committed_device_gb(), 0.0);
    }

    #[test]
    fn allocations_are_sorted() {
        let alloc = allocator(8.0);
        alloc.reserve("b", 1.0, 0.0, QuantizationLevel::Int4).unwrap();
        alloc.reserve("a", 1.0, 0.0, QuantizationLevel::Int4).unwrap();
        let ids: Vec<_> = alloc
            .allocations()
            .into_iter()
            .map(|a| a.model_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
