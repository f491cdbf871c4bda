//! Tests for worker supervision and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use heimdall::{
    HeimdallError, ModelType, ModelWorker, Result, ShutdownStatus, WorkerManager,
};

// ============================================================================
// Mock workers
// ============================================================================

struct SimpleWorker {
    loaded: AtomicBool,
    fail_unload: bool,
}

impl SimpleWorker {
    fn resident() -> Arc<Self> {
        Arc::new(Self {
            loaded: AtomicBool::new(true),
            fail_unload: false,
        })
    }

    fn stuck() -> Arc<Self> {
        Arc::new(Self {
            loaded: AtomicBool::new(true),
            fail_unload: true,
        })
    }
}

#[async_trait]
impl ModelWorker for SimpleWorker {
    async fn load(&self) -> Result<()> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        if self.fail_unload {
            return Err(HeimdallError::WorkerUnloadFailed {
                model_type: ModelType::TextToImage,
                message: "cuda context lost".to_string(),
            });
        }
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

struct SlowUnloadWorker;

#[async_trait]
impl ModelWorker for SlowUnloadWorker {
    async fn load(&self) -> Result<()> {
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn application_enabled(&self) -> bool {
        true
    }
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn register_replaces_existing_worker() {
    let mut manager = WorkerManager::default();
    manager.register(ModelType::Llm, SimpleWorker::resident());
    manager.register(ModelType::Llm, SimpleWorker::stuck());
    manager.register(ModelType::TextToSpeech, SimpleWorker::resident());

    let workers = manager.workers();
    assert_eq!(workers.len(), 2);
    assert!(manager.worker(ModelType::TextToImage).is_none());
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn shutdown_unloads_resident_workers() {
    let llm = SimpleWorker::resident();
    let mut manager = WorkerManager::default();
    manager.register(ModelType::Llm, llm.clone());

    let outcomes = manager.shutdown_workers().await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].name, "llm");
    assert!(outcomes[0].is_success());
    assert!(!llm.is_loaded());
}

#[tokio::test]
async fn one_failing_worker_does_not_block_the_rest() {
    let llm = SimpleWorker::resident();
    let tts = SimpleWorker::resident();
    let mut manager = WorkerManager::default();
    manager.register(ModelType::Llm, llm.clone());
    manager.register(ModelType::TextToImage, SimpleWorker::stuck());
    manager.register(ModelType::TextToSpeech, tts.clone());

    let outcomes = manager.shutdown_workers().await;

    assert_eq!(outcomes.len(), 3);
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "text_to_image");
    assert!(matches!(&failed[0].status, ShutdownStatus::Failed(msg) if msg.contains("cuda")));
    assert!(!llm.is_loaded());
    assert!(!tts.is_loaded());
}

#[tokio::test(start_paused = true)]
async fn slow_unload_times_out() {
    let mut manager = WorkerManager::new(Duration::from_secs(5));
    manager.register(ModelType::Llm, Arc::new(SlowUnloadWorker));

    let outcomes = manager.shutdown_workers().await;

    assert_eq!(outcomes[0].status, ShutdownStatus::TimedOut);
}

#[tokio::test]
async fn tasks_observe_the_shutdown_signal() {
    let manager = WorkerManager::default();
    let stopped = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&stopped);
    manager.spawn("poller", move |mut signal| async move {
        signal.wait().await;
        flag.store(true, Ordering::SeqCst);
    });
    assert_eq!(manager.task_count(), 1);

    let outcomes = manager.shutdown_workers().await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].name, "poller");
    assert!(outcomes[0].is_success());
    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(manager.task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn task_ignoring_the_signal_is_aborted() {
    let manager = WorkerManager::new(Duration::from_secs(1));
    manager.spawn("stubborn", |_signal| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });
    manager.spawn("polite", |mut signal| async move {
        signal.wait().await;
    });

    let outcomes = manager.shutdown_workers().await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].status, ShutdownStatus::TimedOut);
    assert!(outcomes[1].is_success());
}

#[tokio::test]
async fn panicking_task_is_reported_as_failed() {
    let manager = WorkerManager::default();
    manager.spawn("crasher", |_signal| async {
        panic!("worker thread died");
    });

    let outcomes = manager.shutdown_workers().await;

    assert!(matches!(outcomes[0].status, ShutdownStatus::Failed(_)));
}

#[tokio::test]
async fn shutdown_with_nothing_registered_is_empty() {
    let manager = WorkerManager::default();
    assert!(manager.shutdown_workers().await.is_empty());
}
