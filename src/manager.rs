// src/manager.rs
// Public queue API: enqueue, cancel, retry, remove, list and subscribe

use crate::config::QueueConfig;
use crate::engine::AcquisitionEngine;
use crate::error::AppError;
use crate::events::{QueueSnapshot, SnapshotSource, Subscription};
use crate::job::{Descriptor, Job, JobId, JobStatus};
use crate::scheduler::Scheduler;
use crate::store::QueueStore;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::runtime::Handle;

/// Facade over the store, scheduler and broadcaster.
///
/// Validation errors come back synchronously; engine failures never do. They
/// are recorded on the job and reach callers through `subscribe`.
pub struct QueueManager {
    store: Arc<QueueStore>,
    scheduler: Arc<Scheduler>,
}

impl QueueManager {
    /// Build a manager whose workers run on the current tokio runtime
    pub fn new(engine: Arc<dyn AcquisitionEngine>, config: &QueueConfig) -> Result<Self, AppError> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| AppError::General(format!("No tokio runtime available: {}", e)))?;

        let store = Arc::new(QueueStore::new(config.event_buffer));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            engine,
            config.max_concurrent,
            runtime,
        ));
        info!(
            "Queue manager ready ({} concurrent downloads)",
            config.max_concurrent
        );

        Ok(Self { store, scheduler })
    }

    /// Queue a new job; load never causes a rejection
    pub fn enqueue(&self, descriptor: Descriptor) -> Result<JobId, AppError> {
        descriptor.validate()?;
        let job = self.store.create(descriptor);
        info!("Queued job {} for {}", job.id, job.source.url);
        self.scheduler.dispatch();
        Ok(job.id)
    }

    /// Queue several jobs; an invalid descriptor does not stop the rest
    pub fn enqueue_batch(&self, descriptors: Vec<Descriptor>) -> Vec<Result<JobId, AppError>> {
        descriptors
            .into_iter()
            .map(|descriptor| {
                let result = self.enqueue(descriptor);
                if let Err(e) = &result {
                    warn!("Skipping batch entry: {}", e);
                }
                result
            })
            .collect()
    }

    /// Cancel a job. Queued jobs are cancelled at once, active ones at the
    /// engine's next checkpoint. Terminal jobs are left untouched.
    pub fn cancel(&self, id: JobId) -> Result<(), AppError> {
        self.request_cancel(id).map(|_| ())
    }

    /// Cancel every queued or active job; returns how many were affected
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for id in self.store.ids_where(|job| !job.is_terminal()) {
            match self.request_cancel(id) {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => debug!("Skipping job {} in cancel-all: {}", id, e),
            }
        }
        if count > 0 {
            info!("Cancelled {} jobs", count);
            self.store.publish_full_update();
        }
        count
    }

    /// Requeue a failed or cancelled job under the same id
    pub fn retry(&self, id: JobId) -> Result<(), AppError> {
        self.store.update(id, |job| job.reset_for_retry())?;
        info!("Retrying job {}", id);
        self.scheduler.dispatch();
        Ok(())
    }

    /// Delete a job that is not currently active
    pub fn remove(&self, id: JobId) -> Result<(), AppError> {
        self.store.remove_checked(id, |job| {
            if job.is_active() {
                return Err(AppError::InvalidState {
                    id,
                    status: job.status,
                    operation: "remove",
                });
            }
            Ok(())
        })?;
        info!("Removed job {}", id);
        Ok(())
    }

    /// Delete all completed jobs; returns how many were removed
    pub fn clear_completed(&self) -> usize {
        let count = self
            .store
            .remove_where(|job| job.status == JobStatus::Completed);
        if count > 0 {
            info!("Cleared {} completed jobs", count);
        }
        count
    }

    pub fn get(&self, id: JobId) -> Result<Job, AppError> {
        self.store.get(id).ok_or(AppError::NotFound(id))
    }

    /// All jobs in insertion order
    pub fn list(&self) -> Vec<Job> {
        self.store.list()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.store.snapshot()
    }

    /// Event stream starting with a full snapshot
    pub fn subscribe(&self) -> Subscription {
        self.store.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.scheduler.active_count()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.scheduler.limit()
    }

    /// Cancel active jobs, wait for every worker slot to exit, then end
    /// all subscriptions once they have drained their buffered events
    pub async fn shutdown(&self) {
        info!("Shutting down queue manager");
        self.scheduler.shutdown().await;
        self.store.close_events();
    }

    /// Returns true when this call newly requested cancellation
    fn request_cancel(&self, id: JobId) -> Result<bool, AppError> {
        let needs_engine_stop = self.store.update(id, |job| {
            if job.is_terminal() || job.cancel_requested {
                return Ok(None);
            }
            job.cancel_requested = true;
            if job.status == JobStatus::Queued {
                job.mark_cancelled()?;
                return Ok(Some(false));
            }
            Ok(Some(true))
        })?;

        match needs_engine_stop {
            None => Ok(false),
            Some(false) => {
                info!("Cancelled queued job {}", id);
                Ok(true)
            }
            Some(true) => {
                info!("Cancellation requested for job {}", id);
                self.scheduler.request_cancel(id);
                Ok(true)
            }
        }
    }
}
