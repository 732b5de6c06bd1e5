// tests/common/mod.rs
// Scripted acquisition engine: every run blocks until the test finishes it

#![allow(dead_code)]

use async_trait::async_trait;
use mediaq::{
    AcquisitionEngine, Descriptor, EngineOutcome, Job, JobId, JobStatus, ProgressSink,
    QueueConfig, QueueManager, SourceReference,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub enum Finish {
    Outcome(EngineOutcome),
    Panic,
}

/// A run currently blocked inside the engine
pub struct ActiveRun {
    pub url: String,
    pub sink: Arc<dyn ProgressSink>,
    finish: oneshot::Sender<Finish>,
}

impl ActiveRun {
    pub fn progress(&self, percent: f64) {
        self.sink
            .progress(percent, Some("1.00MiB/s".to_string()), Some("00:10".to_string()));
    }

    pub fn processing(&self) {
        self.sink.processing();
    }

    pub fn complete(self, path: &str) {
        let _ = self.finish.send(Finish::Outcome(EngineOutcome::Completed {
            output_path: PathBuf::from(path),
        }));
    }

    pub fn fail(self, message: &str) {
        let _ = self.finish.send(Finish::Outcome(EngineOutcome::Failed {
            message: message.to_string(),
        }));
    }

    pub fn panic(self) {
        let _ = self.finish.send(Finish::Panic);
    }
}

pub struct ScriptedEngine {
    started_tx: mpsc::UnboundedSender<ActiveRun>,
    started_rx: Mutex<mpsc::UnboundedReceiver<ActiveRun>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            started_tx,
            started_rx: Mutex::new(started_rx),
        })
    }

    /// Wait for the next run the scheduler starts
    pub async fn next_run(&self) -> ActiveRun {
        let mut rx = self.started_rx.lock().await;
        tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a run to start")
            .expect("engine channel closed")
    }

    /// Wait for `n` runs and index them by url
    pub async fn next_runs(&self, n: usize) -> HashMap<String, ActiveRun> {
        let mut runs = HashMap::new();
        for _ in 0..n {
            let run = self.next_run().await;
            runs.insert(run.url.clone(), run);
        }
        runs
    }

    /// True when no run has started since the last `next_run`
    pub async fn is_idle(&self) -> bool {
        self.started_rx.lock().await.is_empty()
    }
}

#[async_trait]
impl AcquisitionEngine for ScriptedEngine {
    async fn run(
        &self,
        source: &SourceReference,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> EngineOutcome {
        let (finish_tx, finish_rx) = oneshot::channel();
        let _ = self.started_tx.send(ActiveRun {
            url: source.url.clone(),
            sink: progress,
            finish: finish_tx,
        });

        tokio::select! {
            finish = finish_rx => match finish {
                Ok(Finish::Outcome(outcome)) => outcome,
                Ok(Finish::Panic) => panic!("scripted engine fault"),
                Err(_) => EngineOutcome::Failed { message: "run abandoned".to_string() },
            },
            _ = cancel.cancelled() => EngineOutcome::Cancelled,
        }
    }
}

pub fn config(max_concurrent: usize) -> QueueConfig {
    QueueConfig::default()
        .with_max_concurrent(max_concurrent)
        .with_output_dir(std::env::temp_dir().join("mediaq-tests"))
}

pub fn manager(engine: &Arc<ScriptedEngine>, max_concurrent: usize) -> QueueManager {
    QueueManager::new(engine.clone(), &config(max_concurrent)).expect("manager")
}

pub fn descriptor(name: &str) -> Descriptor {
    Descriptor::builder(&url(name))
        .format("137", "1080p")
        .title(name)
        .build()
}

pub fn url(name: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", name)
}

/// Poll until the job reaches `status`
pub async fn wait_for_status(manager: &QueueManager, id: JobId, status: JobStatus) -> Job {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Ok(job) = manager.get(id) {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {} never reached {}", id, status))
}

/// Poll until no worker slot is held
pub async fn wait_for_idle(manager: &QueueManager) {
    tokio::time::timeout(TIMEOUT, async {
        while manager.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker slots never drained");
}
