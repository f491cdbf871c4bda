//! Model resource manager: the admission control facade.
//!
//! Ties the catalog, the hardware profiler, the quantization ladder and the
//! reservation ledger together. Callers ask whether a model can be loaded and
//! get back either a [`LoadPlan`] (a committed reservation they must honour
//! or release) or a typed [`Rejection`].
//!
//! # Admission flow
//!
//! ```text
//! prepare_model_loading(id, preferred)
//!         │
//!         ▼
//!   registry lookup ──────────► UnknownModel
//!         │
//!         ▼
//!   no live reservation? ─────► AlreadyReserved
//!         │
//!         ▼
//!   sample hardware, subtract committed reservations
//!         │
//!         ▼
//!   min_device / min_host fit? ─► InsufficientDeviceMemory / InsufficientHostMemory
//!         │                       (AllocationConflict if only reservations are in the way)
//!         ▼
//!   quantization ladder ──────► QuantizationInfeasible
//!         │
//!         ▼
//!   allocator.reserve ────────► AllocationConflict / InsufficientHostMemory (lost a race)
//!         │
//!         ▼
//!      LoadPlan
//! ```
//!
//! Nothing here loads a model; loading is delegated to external workers.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::allocator::{Allocation, MemoryAllocator};
use crate::error::Rejection;
use crate::events::{NoopSink, StatusSink};
use crate::hardware::HardwareProfiler;
use crate::quantization::QuantizationStrategy;
use crate::registry::ModelRegistry;
use crate::telemetry;
use crate::types::{
    HardwareProfile, ModelMetadata, ModelStatus, ModelType, Provider, QuantizationLevel,
    StatusEvent,
};

/// An admitted load: which variant, at which precision, with what reserved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPlan {
    pub metadata: ModelMetadata,
    pub quantization: QuantizationLevel,
    pub allocation: Allocation,
}

/// Outcome of [`ModelResourceManager::prepare_model_loading`].
///
/// `Ok` is the `can_load` case; `Err` carries the one-line reason.
pub type PreparePlan = std::result::Result<LoadPlan, Rejection>;

/// Admission-control facade over registry, profiler, ladder and ledger.
pub struct ModelResourceManager {
    registry: Arc<ModelRegistry>,
    profiler: Arc<dyn HardwareProfiler>,
    allocator: MemoryAllocator,
    strategy: QuantizationStrategy,
    sink: Arc<dyn StatusSink>,
}

impl ModelResourceManager {
    /// Create a manager with the default quantization table and no event sink.
    pub fn new(registry: Arc<ModelRegistry>, profiler: Arc<dyn HardwareProfiler>) -> Self {
        Self {
            allocator: MemoryAllocator::new(Arc::clone(&profiler)),
            registry,
            profiler,
            strategy: QuantizationStrategy::default(),
            sink: Arc::new(NoopSink),
        }
    }

    /// Use a custom quantization strategy.
    pub fn with_strategy(mut self, strategy: QuantizationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Publish status events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    pub fn strategy(&self) -> &QuantizationStrategy {
        &self.strategy
    }

    /// Fresh hardware snapshot.
    pub fn profile(&self) -> HardwareProfile {
        self.profiler.get_profile()
    }

    pub fn committed_device_gb(&self) -> f64 {
        self.allocator.committed_device_gb()
    }

    pub fn committed_host_gb(&self) -> f64 {
        self.allocator.committed_host_gb()
    }

    /// Pick the best-fitting catalog entry for the current budget.
    ///
    /// Candidates are admitted only if their *minimum* requirements fit the
    /// uncommitted budget. Among those, the one with the largest
    /// `recommended_device_memory_gb` still within budget wins; ties go to
    /// the largest fitting `recommended_host_memory_gb`, then registry order.
    /// If no recommendation fits, the candidate with the smallest device
    /// recommendation is returned.
    pub fn select_best_model(
        &self,
        provider: Option<Provider>,
        model_type: Option<ModelType>,
    ) -> Option<ModelMetadata> {
        let profile = self.profiler.get_profile();
        let device = (profile.available_device_memory_gb - self.committed_device_gb()).max(0.0);
        let host = (profile.available_host_memory_gb - self.committed_host_gb()).max(0.0);

        let candidates: Vec<&ModelMetadata> = self
            .registry
            .list(provider, model_type)
            .into_iter()
            .filter(|m| m.min_device_memory_gb <= device && m.min_host_memory_gb <= host)
            .collect();

        let host_key = |m: &ModelMetadata| {
            if m.recommended_host_memory_gb <= host {
                m.recommended_host_memory_gb
            } else {
                f64::NEG_INFINITY
            }
        };

        let mut best: Option<&ModelMetadata> = None;
        for candidate in candidates
            .iter()
            .copied()
            .filter(|m| m.recommended_device_memory_gb <= device)
        {
            let better = match best {
                None => true,
                Some(current) => {
                    candidate.recommended_device_memory_gb > current.recommended_device_memory_gb
                        || (candidate.recommended_device_memory_gb
                            == current.recommended_device_memory_gb
                            && host_key(candidate) > host_key(current))
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        let best = best.or_else(|| {
            candidates.iter().copied().fold(None, |acc: Option<&ModelMetadata>, m| match acc {
                Some(a) if a.recommended_device_memory_gb <= m.recommended_device_memory_gb => {
                    Some(a)
                }
                _ => Some(m),
            })
        });

        debug!(
            ?provider,
            ?model_type,
            device_gb = device,
            selected = best.map(|m| m.external_id.as_str()),
            "best model selection"
        );
        best.cloned()
    }

    /// Decide whether `model_id` can be loaded now and, if so, reserve memory
    /// for it.
    ///
    /// The returned plan is a reservation only; the caller must load the
    /// model through its worker or give the memory back with
    /// [`cleanup_model`](Self::cleanup_model).
    #[instrument(skip(self), fields(operation = "prepare"))]
    pub fn prepare_model_loading(
        &self,
        model_id: &str,
        preferred_quantization: Option<QuantizationLevel>,
    ) -> PreparePlan {
        let Some(metadata) = self.registry.get(model_id) else {
            return Err(self.reject(None, model_id, Rejection::UnknownModel(model_id.to_string())));
        };

        match self.admit(metadata, preferred_quantization) {
            Ok(plan) => {
                metrics::counter!(telemetry::ADMISSIONS_TOTAL,
                    "model_type" => metadata.model_type.as_str(),
                )
                .increment(1);
                info!(
                    model = model_id,
                    quantization = %plan.quantization,
                    device_gb = plan.allocation.reserved_device_memory_gb,
                    host_gb = plan.allocation.reserved_host_memory_gb,
                    "model admitted"
                );
                self.sink.publish(
                    StatusEvent::new(metadata.model_type, ModelStatus::Loading)
                        .with_model_id(model_id),
                );
                Ok(plan)
            }
            Err(rejection) => Err(self.reject(Some(metadata.model_type), model_id, rejection)),
        }
    }

    fn admit(
        &self,
        metadata: &ModelMetadata,
        preferred: Option<QuantizationLevel>,
    ) -> PreparePlan {
        let model_id = metadata.external_id.as_str();
        let profile = self.profiler.get_profile();

        // The allocator re-checks this under its lock; failing early keeps
        // a duplicate from being misreported as a memory shortage.
        if self.allocator.get(model_id).is_some() {
            return Err(Rejection::AlreadyReserved(model_id.to_string()));
        }

        let available_device = profile.available_device_memory_gb;
        let uncommitted_device =
            (available_device - self.allocator.committed_device_gb()).max(0.0);
        let uncommitted_host =
            (profile.available_host_memory_gb - self.allocator.committed_host_gb()).max(0.0);

        if metadata.min_device_memory_gb > uncommitted_device {
            return Err(if metadata.min_device_memory_gb <= available_device {
                Rejection::AllocationConflict {
                    requested_gb: metadata.min_device_memory_gb,
                    uncommitted_gb: uncommitted_device,
                }
            } else {
                Rejection::InsufficientDeviceMemory {
                    required_gb: metadata.min_device_memory_gb,
                    available_gb: available_device,
                }
            });
        }

        if metadata.min_host_memory_gb > uncommitted_host {
            return Err(Rejection::InsufficientHostMemory {
                required_gb: metadata.min_host_memory_gb,
                available_gb: uncommitted_host,
            });
        }

        let Some(quantization) = self.strategy.select(metadata, uncommitted_device, preferred)
        else {
            return Err(
                match self.strategy.select(metadata, available_device, preferred) {
                    Some(level) => Rejection::AllocationConflict {
                        requested_gb: self.strategy.estimated_size(metadata, level),
                        uncommitted_gb: uncommitted_device,
                    },
                    None => Rejection::QuantizationInfeasible {
                        size_gb: metadata.size_gb,
                        available_gb: available_device,
                    },
                },
            );
        };

        let device_gb = self
            .strategy
            .estimated_size(metadata, quantization)
            .max(metadata.min_device_memory_gb);
        let host_gb = metadata
            .recommended_host_memory_gb
            .min(uncommitted_host)
            .max(metadata.min_host_memory_gb);

        let allocation = self
            .allocator
            .reserve(model_id, device_gb, host_gb, quantization)?;

        Ok(LoadPlan {
            metadata: metadata.clone(),
            quantization,
            allocation,
        })
    }

    fn reject(
        &self,
        model_type: Option<ModelType>,
        model_id: &str,
        rejection: Rejection,
    ) -> Rejection {
        metrics::counter!(telemetry::REJECTIONS_TOTAL, "reason" => rejection.kind()).increment(1);
        info!(model = model_id, reason = rejection.kind(), "model rejected: {rejection}");
        if let Some(model_type) = model_type {
            self.sink.publish(
                StatusEvent::new(model_type, ModelStatus::Failed)
                    .with_model_id(model_id)
                    .with_detail(rejection.to_string()),
            );
        }
        rejection
    }

    /// Release the reservation held for `model_id`.
    ///
    /// Safe to call for ids that were never prepared, and idempotent: only
    /// the first call after a reservation has any effect.
    #[instrument(skip(self), fields(operation = "cleanup"))]
    pub fn cleanup_model(&self, model_id: &str) -> Option<Allocation> {
        let released = self.allocator.release(model_id)?;
        if let Some(metadata) = self.registry.get(model_id) {
            self.sink.publish(
                StatusEvent::new(metadata.model_type, ModelStatus::Unloaded)
                    .with_model_id(model_id),
            );
        }
        info!(
            model = model_id,
            device_gb = released.reserved_device_memory_gb,
            "reservation cleaned up"
        );
        Some(released)
    }
}
