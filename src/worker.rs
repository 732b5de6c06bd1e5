// src/worker.rs
// Drives one job through the acquisition engine

use crate::engine::{AcquisitionEngine, EngineOutcome, ProgressSink};
use crate::job::{JobId, JobStatus, SourceReference};
use crate::store::QueueStore;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Message recorded when the engine faults instead of reporting an outcome
pub const UNEXPECTED_FAILURE: &str = "Unexpected error during download";

/// Execution context holding the lease on one job.
///
/// Only the slot holding the lease writes progress and the final status of
/// its job while it is active.
pub struct WorkerSlot {
    job_id: JobId,
    store: Arc<QueueStore>,
    cancel: CancellationToken,
}

impl WorkerSlot {
    pub fn new(job_id: JobId, store: Arc<QueueStore>, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            store,
            cancel,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Run the engine to completion and record the terminal status
    pub async fn execute(self: Arc<Self>, engine: Arc<dyn AcquisitionEngine>, source: SourceReference) {
        debug!("Worker starting job {}", self.job_id);

        let sink: Arc<dyn ProgressSink> = self.clone();
        let cancel = self.cancel.clone();

        // Run in its own task so a panicking engine still yields an outcome
        let run = tokio::spawn(async move { engine.run(&source, sink, cancel).await });
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Engine fault while running job {}: {}", self.job_id, e);
                EngineOutcome::Failed {
                    message: UNEXPECTED_FAILURE.to_string(),
                }
            }
        };

        self.finish(outcome);
    }

    /// Cancellation wins over the engine's natural outcome
    fn finish(&self, outcome: EngineOutcome) {
        let cancelled = self.cancel.is_cancelled();
        let failure = match &outcome {
            EngineOutcome::Failed { message } => Some(message.clone()),
            _ => None,
        };
        let result = self.store.update(self.job_id, |job| {
            if cancelled || job.cancel_requested {
                return job.mark_cancelled().map(|_| JobStatus::Cancelled);
            }
            match outcome {
                EngineOutcome::Completed { output_path } => {
                    job.mark_completed(output_path).map(|_| JobStatus::Completed)
                }
                EngineOutcome::Failed { message } => {
                    job.mark_failed(message).map(|_| JobStatus::Failed)
                }
                EngineOutcome::Cancelled => job.mark_cancelled().map(|_| JobStatus::Cancelled),
            }
        });

        match result {
            Ok(JobStatus::Completed) => info!("Job {} completed", self.job_id),
            Ok(JobStatus::Failed) => error!(
                "Job {} failed: {}",
                self.job_id,
                failure.unwrap_or_default()
            ),
            Ok(status) => info!("Job {} finished as {}", self.job_id, status),
            Err(e) => warn!("Could not record outcome of job {}: {}", self.job_id, e),
        }
    }

    /// Propagate a pending cancel request to the engine
    fn checkpoint(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        let requested = self
            .store
            .get(self.job_id)
            .map_or(true, |job| job.cancel_requested);
        if requested {
            debug!("Cancel observed at checkpoint for job {}", self.job_id);
            self.cancel.cancel();
        }
        requested
    }
}

impl ProgressSink for WorkerSlot {
    fn progress(&self, percent: f64, speed: Option<String>, eta: Option<String>) {
        if self.checkpoint() {
            return;
        }
        if let Err(e) = self
            .store
            .update(self.job_id, |job| job.update_progress(percent, speed, eta))
        {
            debug!("Dropped progress for job {}: {}", self.job_id, e);
        }
    }

    fn processing(&self) {
        if self.checkpoint() {
            return;
        }
        let result = self.store.update(self.job_id, |job| match job.status {
            JobStatus::Downloading => job.mark_processing(),
            _ => Ok(()),
        });
        if let Err(e) = result {
            debug!("Could not mark job {} as processing: {}", self.job_id, e);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.checkpoint()
    }
}
