// src/scheduler.rs
// Admission of queued jobs into a bounded number of worker slots

use crate::engine::AcquisitionEngine;
use crate::job::{JobId, JobStatus};
use crate::store::QueueStore;
use crate::worker::WorkerSlot;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Slot held by one execution attempt
struct LeaseEntry {
    generation: u64,
    token: CancellationToken,
}

/// Starts queued jobs in insertion order whenever a slot is free.
///
/// Admission happens under `leases`: a job is marked downloading and its
/// lease recorded in the same critical section, so concurrent enqueues and
/// completions can never push the active count past `limit`.
///
/// A job keeps its lease until its worker task has fully exited, even after
/// its terminal status is committed. A retried job is not admitted again
/// until that older lease is gone.
pub struct Scheduler {
    store: Arc<QueueStore>,
    engine: Arc<dyn AcquisitionEngine>,
    limit: usize,
    /// Lease per admitted job; its length is the active count
    leases: Mutex<HashMap<JobId, LeaseEntry>>,
    next_generation: AtomicU64,
    tasks: TaskTracker,
    runtime: Handle,
    closed: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: Arc<QueueStore>,
        engine: Arc<dyn AcquisitionEngine>,
        limit: usize,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            engine,
            limit: limit.max(1),
            leases: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            tasks: TaskTracker::new(),
            runtime,
            closed: AtomicBool::new(false),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active_count(&self) -> usize {
        self.leases.lock().len()
    }

    /// Fill free slots with the oldest queued jobs
    pub fn dispatch(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut leases = self.leases.lock();
        if leases.len() >= self.limit {
            return;
        }

        for id in self.store.ids_where(|job| job.status == JobStatus::Queued) {
            if leases.len() >= self.limit {
                break;
            }
            // Previous attempt still winding down; its release dispatches again
            if leases.contains_key(&id) {
                continue;
            }

            // The job may have been cancelled or removed since the scan
            let admitted = self.store.update(id, |job| {
                job.mark_started()?;
                Ok(job.source.clone())
            });
            let source = match admitted {
                Ok(source) => source,
                Err(e) => {
                    debug!("Skipping job {} at dispatch: {}", id, e);
                    continue;
                }
            };

            let token = CancellationToken::new();
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            leases.insert(
                id,
                LeaseEntry {
                    generation,
                    token: token.clone(),
                },
            );
            debug!(
                "Dispatched job {} ({}/{} slots in use)",
                id,
                leases.len(),
                self.limit
            );

            let slot = Arc::new(WorkerSlot::new(id, self.store.clone(), token));
            let scheduler = Arc::clone(self);
            let engine = self.engine.clone();
            self.tasks.spawn_on(
                async move {
                    let lease = Lease {
                        scheduler: &scheduler,
                        job_id: id,
                        generation,
                    };
                    slot.execute(engine, source).await;
                    drop(lease);
                    scheduler.dispatch();
                },
                &self.runtime,
            );
        }
    }

    /// Ask the engine running `id` to stop; false if the job holds no slot
    pub fn request_cancel(&self, id: JobId) -> bool {
        match self.leases.lock().get(&id) {
            Some(lease) => {
                lease.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop admitting jobs, cancel every active one and wait for all slots to drain
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for lease in self.leases.lock().values() {
            lease.token.cancel();
        }
        self.tasks.close();
        self.tasks.wait().await;
        debug!("Scheduler drained");
    }

    fn release(&self, id: JobId, generation: u64) {
        let mut leases = self.leases.lock();
        if leases.get(&id).is_some_and(|lease| lease.generation == generation) {
            leases.remove(&id);
        }
    }
}

/// Returns the slot exactly once, however the worker task ends
struct Lease<'a> {
    scheduler: &'a Scheduler,
    job_id: JobId,
    generation: u64,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.scheduler.release(self.job_id, self.generation);
    }
}
