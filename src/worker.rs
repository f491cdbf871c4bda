//! Worker handle contract and supervision.
//!
//! Workers are the boundary to the external inference libraries: the core
//! never loads weights itself, it only calls [`ModelWorker::load`] and
//! [`ModelWorker::unload`] and observes [`ModelWorker::is_loaded`].
//!
//! - [`ManagedWorker`] wraps an external worker so that every load goes
//!   through admission control and every unload releases its reservation.
//! - [`WorkerManager`] owns worker handles and background tasks and tears
//!   them down with a bounded wait per task.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{HeimdallError, Rejection, Result};
use crate::manager::{LoadPlan, ModelResourceManager};
use crate::telemetry;
use crate::types::{ModelType, QuantizationLevel};

/// Default bounded wait per worker task during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to an external model worker.
///
/// `load` may block for a long time (weights I/O); on success the worker
/// must report itself resident. `unload` must be idempotent.
#[async_trait]
pub trait ModelWorker: Send + Sync {
    /// Worker name for logging.
    fn name(&self) -> &str {
        "worker"
    }

    async fn load(&self) -> Result<()>;

    async fn unload(&self) -> Result<()>;

    /// Whether the model is currently resident.
    fn is_loaded(&self) -> bool;

    /// Whether the user has this category switched on.
    fn application_enabled(&self) -> bool;
}

/// A worker whose loads are admitted by a [`ModelResourceManager`].
///
/// `load` reserves memory first and releases it again if the inner load
/// fails or leaves the model non-resident; `unload` releases the reservation once the inner worker is down.
pub struct ManagedWorker {
    inner: Arc<dyn ModelWorker>,
    manager: Arc<ModelResourceManager>,
    model_id: String,
    model_type: ModelType,
    preferred: Option<QuantizationLevel>,
    plan: Mutex<Option<LoadPlan>>,
}

impl ManagedWorker {
    /// Wrap `inner` as the worker for catalog entry `model_id`.
    pub fn new(
        manager: Arc<ModelResourceManager>,
        model_id: impl Into<String>,
        inner: Arc<dyn ModelWorker>,
    ) -> Result<Self> {
        let model_id = model_id.into();
        let model_type = manager
            .registry()
            .get(&model_id)
            .map(|m| m.model_type)
            .ok_or_else(|| Rejection::UnknownModel(model_id.clone()))?;
        Ok(Self {
            inner,
            manager,
            model_id,
            model_type,
            preferred: None,
            plan: Mutex::new(None),
        })
    }

    /// Ask for a specific precision when it fits.
    pub fn with_preferred_quantization(mut self, level: QuantizationLevel) -> Self {
        self.preferred = Some(level);
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    /// The plan the current residency was admitted with.
    pub fn plan(&self) -> Option<LoadPlan> {
        self.plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_plan(&self, plan: Option<LoadPlan>) {
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = plan;
    }
}

#[async_trait]
impl ModelWorker for ManagedWorker {
    fn name(&self) -> &str {
        &self.model_id
    }

    async fn load(&self) -> Result<()> {
        let plan = self
            .manager
            .prepare_model_loading(&self.model_id, self.preferred)
            .map_err(|rejection| HeimdallError::WorkerLoadFailed {
                model_type: self.model_type,
                message: rejection.to_string(),
            })?;

        let loaded = match self.inner.load().await {
            Ok(()) if self.inner.is_loaded() => Ok(()),
            Ok(()) => Err(HeimdallError::WorkerLoadFailed {
                model_type: self.model_type,
                message: "worker reported success but is not resident".to_string(),
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = loaded {
            // No reservation without a resident model.
            self.manager.cleanup_model(&self.model_id);
            self.set_plan(None);
            return Err(e);
        }

        debug!(model = %self.model_id, quantization = %plan.quantization, "worker loaded");
        self.set_plan(Some(plan));
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        self.inner.unload().await?;
        self.manager.cleanup_model(&self.model_id);
        self.set_plan(None);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }

    fn application_enabled(&self) -> bool {
        self.inner.application_enabled()
    }
}

/// Stop notification handed to supervised tasks.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested (or the manager is dropped).
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// How one worker's teardown ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Stopped (or unloaded) cleanly.
    Stopped,
    /// Did not finish within the bounded wait and was aborted.
    TimedOut,
    /// Stop failed or the task panicked.
    Failed(String),
}

/// Per-worker teardown result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOutcome {
    pub name: String,
    pub status: ShutdownStatus,
}

impl ShutdownOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ShutdownStatus::Stopped
    }
}

struct SupervisedTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Owns worker handles and the background tasks serving them.
pub struct WorkerManager {
    workers: BTreeMap<ModelType, Arc<dyn ModelWorker>>,
    tasks: Mutex<Vec<SupervisedTask>>,
    shutdown: watch::Sender<bool>,
    join_timeout: Duration,
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl WorkerManager {
    /// Create a manager that waits at most `join_timeout` per task on shutdown.
    pub fn new(join_timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            workers: BTreeMap::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown,
            join_timeout,
        }
    }

    /// Register the worker serving `model_type`, replacing any previous one.
    pub fn register(&mut self, model_type: ModelType, worker: Arc<dyn ModelWorker>) {
        if self.workers.insert(model_type, worker).is_some() {
            debug!(%model_type, "replaced registered worker");
        }
    }

    /// Registered worker handles, keyed by category.
    pub fn workers(&self) -> BTreeMap<ModelType, Arc<dyn ModelWorker>> {
        self.workers.clone()
    }

    pub fn worker(&self, model_type: ModelType) -> Option<Arc<dyn ModelWorker>> {
        self.workers.get(&model_type).cloned()
    }

    /// Run a supervised background task.
    ///
    /// The task receives a [`ShutdownSignal`] and should return promptly
    /// once it fires; tasks that overrun the join timeout are aborted.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let signal = ShutdownSignal {
            rx: self.shutdown.subscribe(),
        };
        let handle = tokio::spawn(task(signal));
        debug!(task = %name, "spawned supervised task");
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SupervisedTask { name, handle });
    }

    /// Number of supervised tasks not yet joined.
    pub fn task_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop everything, continuing past individual failures.
    ///
    /// Signals shutdown, unloads every resident worker, then joins each
    /// task with the bounded timeout, aborting the ones that overrun.
    /// Returns one outcome per unloaded worker and per task; never panics.
    pub async fn shutdown_workers(&self) -> Vec<ShutdownOutcome> {
        self.shutdown.send_replace(true);
        let mut outcomes = Vec::new();

        for (model_type, worker) in &self.workers {
            if !worker.is_loaded() {
                continue;
            }
            let status = match tokio::time::timeout(self.join_timeout, worker.unload()).await {
                Ok(Ok(())) => ShutdownStatus::Stopped,
                Ok(Err(e)) => ShutdownStatus::Failed(e.to_string()),
                Err(_) => ShutdownStatus::TimedOut,
            };
            outcomes.push(Self::record(model_type.as_str(), status));
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for SupervisedTask { name, mut handle } in tasks {
            let status = match tokio::time::timeout(self.join_timeout, &mut handle).await {
                Ok(Ok(())) => ShutdownStatus::Stopped,
                Ok(Err(e)) => ShutdownStatus::Failed(e.to_string()),
                Err(_) => {
                    handle.abort();
                    ShutdownStatus::TimedOut
                }
            };
            outcomes.push(Self::record(&name, status));
        }

        info!(
            total = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.is_success()).count(),
            "workers shut down"
        );
        outcomes
    }

    fn record(name: &str, status: ShutdownStatus) -> ShutdownOutcome {
        if status != ShutdownStatus::Stopped {
            warn!(worker = name, ?status, "worker did not shut down cleanly");
            metrics::counter!(telemetry::WORKER_FAILURES_TOTAL,
                "worker" => name.to_owned(),
                "operation" => "shutdown",
            )
            .increment(1);
        }
        ShutdownOutcome {
            name: name.to_string(),
            status,
        }
    }
}
