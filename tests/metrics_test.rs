//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use heimdall::hardware::StaticProfiler;
use heimdall::telemetry;
use heimdall::{
    HeimdallError, ModelLoadBalancer, ModelMetadata, ModelRegistry, ModelResourceManager,
    ModelType, ModelWorker, Provider, Result, WorkerManager, default_groups,
};

// ============================================================================
// Mock workers
// ============================================================================

struct ToggleWorker {
    loaded: AtomicBool,
    broken: bool,
}

#[async_trait]
impl ModelWorker for ToggleWorker {
    async fn load(&self) -> Result<()> {
        if self.broken {
            return Err(HeimdallError::WorkerLoadFailed {
                model_type: ModelType::TextToImage,
                message: "out of memory".to_string(),
            });
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        self.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn application_enabled(&self) -> bool {
        true
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Find a counter value by name and one label pair.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Label keys of every counter recorded under `name`.
fn counter_label_keys(snapshot: &SnapshotVec, name: &str) -> Vec<Vec<String>> {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(key, _, _, _)| {
            let mut keys: Vec<String> = key.key().labels().map(|l| l.key().to_string()).collect();
            keys.sort();
            keys
        })
        .collect()
}

/// Last value of a gauge.
fn gauge_value(snapshot: &SnapshotVec, name: &str) -> Option<f64> {
    snapshot
        .iter()
        .find(|(key, _, _, _)| key.kind() == MetricKind::Gauge && key.key().name() == name)
        .and_then(|(_, _, _, value)| match value {
            DebugValue::Gauge(v) => Some(v.into_inner()),
            _ => None,
        })
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn manager(device_gb: f64) -> ModelResourceManager {
    let mut registry = ModelRegistry::new();
    registry
        .register(
            ModelMetadata::new("chat", "Chat", Provider::Mistral, ModelType::Llm, 6.0)
                .with_min_memory(4.0, 0.0)
                .with_recommended_memory(6.0, 1.0),
        )
        .unwrap();
    ModelResourceManager::new(
        Arc::new(registry),
        Arc::new(StaticProfiler::with_budget(device_gb, 16.0)),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn admission_records_counter_and_gauges() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let mgr = manager(8.0);
        mgr.prepare_model_loading("chat", None).unwrap();
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::ADMISSIONS_TOTAL, "model_type", "llm"),
        1
    );
    assert_eq!(gauge_value(&snapshot, telemetry::COMMITTED_DEVICE_GB), Some(6.0));
    assert_eq!(gauge_value(&snapshot, telemetry::COMMITTED_HOST_GB), Some(1.0));
}

#[test]
fn rejection_records_reason() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let mgr = manager(2.0);
        let _ = mgr.prepare_model_loading("chat", None);
        let _ = mgr.prepare_model_loading("missing", None);
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REJECTIONS_TOTAL), 2);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::REJECTIONS_TOTAL,
            "reason",
            "insufficient_device_memory"
        ),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REJECTIONS_TOTAL, "reason", "unknown_model"),
        1
    );
}

#[test]
fn release_is_counted_once() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let mgr = manager(8.0);
        mgr.prepare_model_loading("chat", None).unwrap();
        mgr.cleanup_model("chat");
        mgr.cleanup_model("chat");
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::RELEASES_TOTAL), 1);
    assert_eq!(gauge_value(&snapshot, telemetry::COMMITTED_DEVICE_GB), Some(0.0));
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn group_switch_records_status_and_duration() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let mut workers: BTreeMap<ModelType, Arc<dyn ModelWorker>> = BTreeMap::new();
    workers.insert(
        ModelType::Llm,
        Arc::new(ToggleWorker {
            loaded: AtomicBool::new(true),
            broken: false,
        }),
    );
    workers.insert(
        ModelType::TextToImage,
        Arc::new(ToggleWorker {
            loaded: AtomicBool::new(false),
            broken: true,
        }),
    );
    let balancer = ModelLoadBalancer::new(default_groups(), workers)
        .unwrap()
        .with_initial_group("conversational")
        .unwrap();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                balancer
                    .switch_to_group("art", &[ModelType::TextToImage])
                    .await
                    .unwrap();
                balancer.switch_back().await.unwrap();
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::GROUP_SWITCHES_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::GROUP_SWITCHES_TOTAL, "status", "partial"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::WORKER_FAILURES_TOTAL, "operation", "load"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::WORKER_FAILURES_TOTAL, "worker", "text_to_image"),
        1
    );
    assert!(has_histogram(
        &snapshot,
        telemetry::GROUP_SWITCH_DURATION_SECONDS
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn worker_failures_use_one_label_set() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let mut workers: BTreeMap<ModelType, Arc<dyn ModelWorker>> = BTreeMap::new();
    workers.insert(
        ModelType::TextToImage,
        Arc::new(ToggleWorker {
            loaded: AtomicBool::new(false),
            broken: true,
        }),
    );
    let balancer = ModelLoadBalancer::new(default_groups(), workers).unwrap();

    let supervisor = WorkerManager::default();
    supervisor.spawn("crasher", |_signal| async {
        panic!("worker thread died");
    });

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                balancer
                    .switch_to_group("art", &[ModelType::TextToImage])
                    .await
                    .unwrap();
                supervisor.shutdown_workers().await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    let label_sets = counter_label_keys(&snapshot, telemetry::WORKER_FAILURES_TOTAL);
    assert_eq!(label_sets.len(), 2);
    for keys in label_sets {
        assert_eq!(keys, vec!["operation".to_string(), "worker".to_string()]);
    }
    assert_eq!(
        counter_with_label(&snapshot, telemetry::WORKER_FAILURES_TOTAL, "worker", "crasher"),
        1
    );
}

#[test]
fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let mgr = manager(8.0);
    mgr.prepare_model_loading("chat", None).unwrap();
    mgr.cleanup_model("chat");
}
