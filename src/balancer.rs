//! Working-set load balancer.
//!
//! Groups model categories into mutually exclusive working sets (for
//! example a conversational set and an image-generation set). Switching
//! groups unloads the resident members of the old group and loads the
//! requested members of the new one, remembering which evicted categories
//! were active so they can be restored when the user switches back.
//!
//! # State machine
//!
//! ```text
//!   Idle ──switch──► Transitioning ──done──► Resident(group)
//!                          ▲                        │
//!                          └────────switch──────────┘
//! ```
//!
//! A switch requested while another is in flight is refused with
//! [`HeimdallError::SwitchInProgress`]. Worker I/O never runs under the
//! state lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{HeimdallError, Result};
use crate::events::{NoopSink, StatusSink};
use crate::telemetry;
use crate::types::{ModelStatus, ModelType, StatusEvent};
use crate::worker::ModelWorker;

/// A named set of categories that are resident together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSetGroup {
    pub name: String,
    pub members: Vec<ModelType>,
}

impl WorkingSetGroup {
    pub fn new(name: impl Into<String>, members: impl IntoIterator<Item = ModelType>) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().collect(),
        }
    }

    pub fn contains(&self, model_type: ModelType) -> bool {
        self.members.contains(&model_type)
    }
}

/// The stock grouping: chat/voice models versus image generation.
pub fn default_groups() -> Vec<WorkingSetGroup> {
    vec![
        WorkingSetGroup::new(
            "conversational",
            [
                ModelType::Llm,
                ModelType::SpeechToText,
                ModelType::TextToSpeech,
            ],
        ),
        WorkingSetGroup::new("art", [ModelType::TextToImage]),
    ]
}

/// Where the balancer is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancerState {
    /// No group has been entered yet.
    Idle,
    /// A switch is unloading and loading workers.
    Transitioning { from: Option<String>, to: String },
    /// `group` is the active working set.
    Resident(String),
}

impl BalancerState {
    pub fn current_group(&self) -> Option<&str> {
        match self {
            Self::Resident(group) => Some(group),
            _ => None,
        }
    }
}

/// Which worker call failed during a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOperation {
    Load,
    Unload,
}

impl WorkerOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Unload => "unload",
        }
    }
}

/// A worker failure that did not abort the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFailure {
    pub model_type: ModelType,
    pub operation: WorkerOperation,
    pub message: String,
}

/// What a switch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchReport {
    pub from: Option<String>,
    pub to: Option<String>,
    /// Categories that were active and got unloaded; these are restored on
    /// the next switch back into `from`.
    pub evicted: Vec<ModelType>,
    /// Categories loaded by this switch.
    pub loaded: Vec<ModelType>,
    pub failures: Vec<WorkerFailure>,
}

impl SwitchReport {
    /// Whether every worker call succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether the switch did nothing at all.
    pub fn is_noop(&self) -> bool {
        self.to.is_none()
    }
}

#[derive(Debug)]
struct SwitchState {
    state: BalancerState,
    previous: Option<String>,
    /// Active categories evicted when leaving each group.
    evicted: HashMap<String, BTreeSet<ModelType>>,
}

/// Resets a dropped, unfinished switch back to where it started.
struct TransitionGuard<'a> {
    inner: &'a Mutex<SwitchState>,
    from: Option<String>,
    armed: bool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.state = match self.from.take() {
                Some(group) => BalancerState::Resident(group),
                None => BalancerState::Idle,
            };
        }
    }
}

/// Swaps working-set groups on a constrained device.
pub struct ModelLoadBalancer {
    groups: Vec<WorkingSetGroup>,
    workers: BTreeMap<ModelType, Arc<dyn ModelWorker>>,
    inner: Mutex<SwitchState>,
    sink: Arc<dyn StatusSink>,
}

impl ModelLoadBalancer {
    /// Create a balancer over `groups` driving `workers`.
    ///
    /// Group names must be unique.
    pub fn new(
        groups: Vec<WorkingSetGroup>,
        workers: BTreeMap<ModelType, Arc<dyn ModelWorker>>,
    ) -> Result<Self> {
        let mut names = HashSet::new();
        for group in &groups {
            if group.name.is_empty() {
                return Err(HeimdallError::Configuration(
                    "working-set group name must not be empty".to_string(),
                ));
            }
            if !names.insert(group.name.as_str()) {
                return Err(HeimdallError::Configuration(format!(
                    "duplicate working-set group '{}'",
                    group.name
                )));
            }
        }

        Ok(Self {
            groups,
            workers,
            inner: Mutex::new(SwitchState {
                state: BalancerState::Idle,
                previous: None,
                evicted: HashMap::new(),
            }),
            sink: Arc::new(NoopSink),
        })
    }

    /// Publish status events to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start out resident in `group` without touching any worker.
    pub fn with_initial_group(self, group: &str) -> Result<Self> {
        self.group(group)?;
        self.lock().state = BalancerState::Resident(group.to_string());
        Ok(self)
    }

    pub fn groups(&self) -> &[WorkingSetGroup] {
        &self.groups
    }

    pub fn state(&self) -> BalancerState {
        self.lock().state.clone()
    }

    pub fn current_group(&self) -> Option<String> {
        self.lock().state.current_group().map(str::to_string)
    }

    /// Categories that will be restored when switching back into `group`.
    pub fn pending_restore(&self, group: &str) -> Vec<ModelType> {
        self.lock()
            .evicted
            .get(group)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Categories whose workers currently report resident.
    pub fn get_loaded_models(&self) -> Vec<ModelType> {
        self.workers
            .iter()
            .filter(|(_, worker)| worker.is_loaded())
            .map(|(model_type, _)| *model_type)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, SwitchState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn group(&self, name: &str) -> Result<&WorkingSetGroup> {
        self.groups
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| HeimdallError::UnknownGroup(name.to_string()))
    }

    /// Make `target` the active working set.
    ///
    /// Unloads resident members of the current group that `target` does not
    /// share, then loads `requested` members of `target` together with any
    /// categories that were active when `target` was last left. Worker
    /// failures are reported in the result and do not stop the switch.
    #[instrument(skip(self), fields(operation = "switch"))]
    pub async fn switch_to_group(
        &self,
        target: &str,
        requested: &[ModelType],
    ) -> Result<SwitchReport> {
        let to = self.group(target)?;

        let (from, restore) = {
            let mut inner = self.lock();
            let from = match &inner.state {
                BalancerState::Transitioning { .. } => return Err(HeimdallError::SwitchInProgress),
                BalancerState::Resident(group) => Some(group.clone()),
                BalancerState::Idle => None,
            };
            inner.state = BalancerState::Transitioning {
                from: from.clone(),
                to: target.to_string(),
            };
            let restore = inner.evicted.remove(target).unwrap_or_default();
            (from, restore)
        };
        let mut guard = TransitionGuard {
            inner: &self.inner,
            from: from.clone(),
            armed: true,
        };

        for model_type in requested {
            if !to.contains(*model_type) {
                warn!(%model_type, group = target, "requested category is not a member of the group");
            }
        }
        let wanted: BTreeSet<ModelType> = restore
            .into_iter()
            .chain(requested.iter().copied())
            .collect();

        let leaving = from
            .as_deref()
            .filter(|name| *name != target)
            .and_then(|name| self.groups.iter().find(|g| g.name == name));

        let started = Instant::now();
        let report = self.transition(from.clone(), leaving, to, &wanted).await;

        {
            let mut inner = self.lock();
            inner.state = BalancerState::Resident(target.to_string());
            if let Some(left) = leaving {
                inner.previous = Some(left.name.clone());
                inner
                    .evicted
                    .insert(left.name.clone(), report.evicted.iter().copied().collect());
            }
        }
        guard.armed = false;

        self.record_switch(target, &report, started);
        Ok(report)
    }

    /// Return to the group left by the last [`switch_to_group`](Self::switch_to_group).
    ///
    /// The previous group is consumed, so a second call without an
    /// intervening switch is a no-op and returns an empty report.
    #[instrument(skip(self), fields(operation = "switch_back"))]
    pub async fn switch_back(&self) -> Result<SwitchReport> {
        let (from, target) = {
            let mut inner = self.lock();
            let from = match &inner.state {
                BalancerState::Transitioning { .. } => return Err(HeimdallError::SwitchInProgress),
                BalancerState::Resident(group) => Some(group.clone()),
                BalancerState::Idle => None,
            };
            let Some(target) = inner.previous.take() else {
                debug!("no previous group to switch back to");
                return Ok(SwitchReport::default());
            };
            inner.state = BalancerState::Transitioning {
                from: from.clone(),
                to: target.clone(),
            };
            (from, target)
        };
        let mut guard = TransitionGuard {
            inner: &self.inner,
            from: from.clone(),
            armed: true,
        };

        let to = self.group(&target)?;
        let restore = self.lock().evicted.remove(&target).unwrap_or_default();
        let leaving = from
            .as_deref()
            .filter(|name| *name != target)
            .and_then(|name| self.groups.iter().find(|g| g.name == name));

        let started = Instant::now();
        let report = self.transition(from.clone(), leaving, to, &restore).await;

        {
            let mut inner = self.lock();
            inner.state = BalancerState::Resident(target.clone());
            if let Some(left) = leaving {
                inner
                    .evicted
                    .insert(left.name.clone(), report.evicted.iter().copied().collect());
            }
        }
        guard.armed = false;

        self.record_switch(&target, &report, started);
        Ok(report)
    }

    async fn transition(
        &self,
        from: Option<String>,
        leaving: Option<&WorkingSetGroup>,
        to: &WorkingSetGroup,
        wanted: &BTreeSet<ModelType>,
    ) -> SwitchReport {
        let mut report = SwitchReport {
            from,
            to: Some(to.name.clone()),
            ..SwitchReport::default()
        };

        if let Some(leaving) = leaving {
            for model_type in leaving.members.iter().copied() {
                if to.contains(model_type) {
                    continue;
                }
                let Some(worker) = self.workers.get(&model_type) else {
                    continue;
                };
                if !worker.is_loaded() {
                    continue;
                }
                // Residency of a disabled category belongs to the user setting.
                if !worker.application_enabled() {
                    debug!(%model_type, "leaving disabled category resident");
                    continue;
                }
                match worker.unload().await {
                    Ok(()) => {
                        self.publish(model_type, ModelStatus::Unloaded, None);
                        report.evicted.push(model_type);
                    }
                    Err(e) => {
                        self.fail(&mut report, model_type, WorkerOperation::Unload, e.to_string())
                    }
                }
            }
        }

        for model_type in to.members.iter().copied() {
            if !wanted.contains(&model_type) {
                continue;
            }
            let Some(worker) = self.workers.get(&model_type) else {
                warn!(%model_type, group = %to.name, "no worker registered for category");
                continue;
            };
            if worker.is_loaded() {
                continue;
            }
            self.publish(model_type, ModelStatus::Loading, None);
            match worker.load().await {
                Ok(()) if worker.is_loaded() => {
                    self.publish(model_type, ModelStatus::Loaded, None);
                    report.loaded.push(model_type);
                }
                Ok(()) => self.fail(
                    &mut report,
                    model_type,
                    WorkerOperation::Load,
                    "worker reported success but is not resident".to_string(),
                ),
                Err(e) => self.fail(&mut report, model_type, WorkerOperation::Load, e.to_string()),
            }
        }

        report
    }

    fn fail(
        &self,
        report: &mut SwitchReport,
        model_type: ModelType,
        operation: WorkerOperation,
        message: String,
    ) {
        warn!(%model_type, operation = operation.as_str(), error = %message, "worker call failed");
        metrics::counter!(telemetry::WORKER_FAILURES_TOTAL,
            "worker" => model_type.as_str(),
            "operation" => operation.as_str(),
        )
        .increment(1);
        self.publish(model_type, ModelStatus::Failed, Some(message.clone()));
        report.failures.push(WorkerFailure {
            model_type,
            operation,
            message,
        });
    }

    fn publish(&self, model_type: ModelType, status: ModelStatus, detail: Option<String>) {
        let mut event = StatusEvent::new(model_type, status);
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.sink.publish(event);
    }

    fn record_switch(&self, target: &str, report: &SwitchReport, started: Instant) {
        let status = if report.is_complete() { "ok" } else { "partial" };
        metrics::counter!(telemetry::GROUP_SWITCHES_TOTAL,
            "group" => target.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::GROUP_SWITCH_DURATION_SECONDS,
            "group" => target.to_owned(),
        )
        .record(started.elapsed().as_secs_f64());
        info!(
            from = report.from.as_deref(),
            to = target,
            evicted = ?report.evicted,
            loaded = ?report.loaded,
            failures = report.failures.len(),
            "working set switched"
        );
    }
}
