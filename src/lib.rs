//! Heimdall - model resource management for local inference
//!
//! Decides whether, and at which precision, a model may be loaded onto a
//! memory-constrained accelerator, keeps a ledger of committed reservations
//! so concurrent loads cannot over-commit the device, and swaps whole
//! working sets of models in and out when the user switches modes.
//!
//! Heimdall never loads weights itself. Inference libraries are reached
//! through the [`ModelWorker`] trait.
//!
//! # Admission Example
//!
//! ```rust
//! use std::sync::Arc;
//! use heimdall::{ModelRegistry, ModelResourceManager};
//! use heimdall::hardware::StaticProfiler;
//!
//! let registry = Arc::new(ModelRegistry::with_embedded_seed());
//! let profiler = Arc::new(StaticProfiler::with_budget(8.0, 32.0));
//! let manager = ModelResourceManager::new(registry, profiler);
//!
//! match manager.prepare_model_loading("mistralai/Mistral-7B-Instruct-v0.3", None) {
//!     Ok(plan) => println!("load at {} using {:.1}GB", plan.quantization,
//!         plan.allocation.reserved_device_memory_gb),
//!     Err(reason) => println!("cannot load: {reason}"),
//! }
//! ```
//!
//! # Working-Set Example
//!
//! ```rust,ignore
//! let balancer = ModelLoadBalancer::new(default_groups(), workers.workers())?
//!     .with_initial_group("conversational")?;
//!
//! // Image generation needs the whole device: evict chat models.
//! balancer.switch_to_group("art", &[ModelType::TextToImage]).await?;
//! // ...and bring back exactly what was active before.
//! balancer.switch_back().await?;
//! ```

pub mod allocator;
pub mod balancer;
pub mod config;
pub mod error;
pub mod events;
pub mod hardware;
pub mod manager;
pub mod quantization;
pub mod registry;
pub mod telemetry;
pub mod types;
pub mod worker;

// Re-export main types at crate root
pub use allocator::{Allocation, MemoryAllocator};
pub use balancer::{
    BalancerState, ModelLoadBalancer, SwitchReport, WorkerFailure, WorkerOperation,
    WorkingSetGroup, default_groups,
};
pub use config::Config;
pub use error::{HeimdallError, Rejection, Result};
pub use events::{BroadcastSink, NoopSink, RecordingSink, StatusSink};
pub use hardware::{HardwareProfiler, StaticProfiler, SystemProfiler};
pub use manager::{LoadPlan, ModelResourceManager, PreparePlan};
pub use quantization::QuantizationStrategy;
pub use registry::ModelRegistry;
pub use worker::{
    ManagedWorker, ModelWorker, ShutdownOutcome, ShutdownSignal, ShutdownStatus, WorkerManager,
};

// Re-export all types
pub use types::{
    HardwareProfile, ModelMetadata, ModelStatus, ModelType, Provider, QuantizationLevel,
    StatusEvent,
};
