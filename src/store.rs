// src/store.rs
// Single source of truth for job state

use crate::error::AppError;
use crate::events::{Broadcaster, QueueEvent, QueueSnapshot, SnapshotSource, Subscription};
use crate::job::{Descriptor, Job, JobId};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// A job plus its tombstone flag
#[derive(Debug)]
struct Entry {
    job: Job,
    removed: bool,
}

#[derive(Debug, Default)]
struct JobTable {
    /// Insertion order
    order: Vec<JobId>,
    entries: HashMap<JobId, Arc<Mutex<Entry>>>,
}

impl JobTable {
    fn jobs(&self) -> Vec<Job> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.lock().job.clone())
            .collect()
    }
}

/// Ordered collection of jobs keyed by id.
///
/// Every job sits behind its own lock: updates to different jobs never wait on
/// each other, updates to the same job are serialized. Each committed mutation
/// is published while that lock is still held, so observers see a job's
/// transitions in the order they were applied.
///
/// Lock order is table before entry; nothing takes the table lock while
/// holding an entry lock.
#[derive(Debug)]
pub struct QueueStore {
    table: RwLock<JobTable>,
    events: Broadcaster,
}

impl QueueStore {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            table: RwLock::new(JobTable::default()),
            events: Broadcaster::new(event_buffer),
        }
    }

    /// Insert a new queued job built from `descriptor`
    pub fn create(&self, descriptor: Descriptor) -> Job {
        let mut job = Job::new(descriptor);
        job.touch();

        let mut table = self.table.write();
        table.order.push(job.id);
        table.entries.insert(
            job.id,
            Arc::new(Mutex::new(Entry {
                job: job.clone(),
                removed: false,
            })),
        );
        // Still under the table lock: nobody can update the job before this lands
        self.events.publish(QueueEvent::ItemUpdate {
            item: job.clone(),
            removed: false,
        });
        debug!("Stored job {} ({} jobs total)", job.id, table.order.len());
        job
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        let entry = self.entry(id)?;
        let entry = entry.lock();
        (!entry.removed).then(|| entry.job.clone())
    }

    /// Apply `mutate` atomically with respect to other updates of the same job.
    ///
    /// On `Err` the job is left exactly as it was. A mutation that changes the
    /// job bumps its revision and is published as an `item_update`.
    pub fn update<T>(
        &self,
        id: JobId,
        mutate: impl FnOnce(&mut Job) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let entry = self.entry(id).ok_or(AppError::NotFound(id))?;
        let mut entry = entry.lock();
        if entry.removed {
            return Err(AppError::NotFound(id));
        }

        let before = entry.job.clone();
        match mutate(&mut entry.job) {
            Ok(out) => {
                if entry.job != before {
                    entry.job.touch();
                    self.events.publish(QueueEvent::ItemUpdate {
                        item: entry.job.clone(),
                        removed: false,
                    });
                }
                Ok(out)
            }
            Err(e) => {
                entry.job = before;
                Err(e)
            }
        }
    }

    /// All jobs in insertion order
    pub fn list(&self) -> Vec<Job> {
        self.table.read().jobs()
    }

    /// Ids of jobs satisfying `pred`, in insertion order
    pub fn ids_where(&self, pred: impl Fn(&Job) -> bool) -> Vec<JobId> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter(|id| {
                table
                    .entries
                    .get(*id)
                    .is_some_and(|entry| pred(&entry.lock().job))
            })
            .copied()
            .collect()
    }

    /// Delete a job unconditionally
    pub fn remove(&self, id: JobId) -> bool {
        self.remove_checked(id, |_| Ok(())).is_ok()
    }

    /// Delete a job if `check` accepts its current state
    pub fn remove_checked(
        &self,
        id: JobId,
        check: impl FnOnce(&Job) -> Result<(), AppError>,
    ) -> Result<Job, AppError> {
        let mut table = self.table.write();
        let entry = table.entries.get(&id).cloned().ok_or(AppError::NotFound(id))?;
        let mut entry = entry.lock();
        check(&entry.job)?;

        entry.removed = true;
        entry.job.touch();
        table.entries.remove(&id);
        table.order.retain(|other| *other != id);
        self.events.publish(QueueEvent::ItemUpdate {
            item: entry.job.clone(),
            removed: true,
        });
        Ok(entry.job.clone())
    }

    /// Delete every job matching `pred`; publishes one `full_update` if anything went
    pub fn remove_where(&self, pred: impl Fn(&Job) -> bool) -> usize {
        let mut table = self.table.write();
        let mut removed = Vec::new();

        for (id, entry) in table.entries.iter() {
            let mut entry = entry.lock();
            if pred(&entry.job) {
                entry.removed = true;
                entry.job.touch();
                removed.push(*id);
            }
        }

        if removed.is_empty() {
            return 0;
        }

        for id in &removed {
            table.entries.remove(id);
        }
        table.order.retain(|id| !removed.contains(id));

        let snapshot = QueueSnapshot::from_jobs(table.jobs());
        self.events.publish(QueueEvent::FullUpdate { queue: snapshot });
        removed.len()
    }

    /// Tell observers to resynchronise after a bulk change
    pub fn publish_full_update(&self) {
        self.events.publish(QueueEvent::FullUpdate {
            queue: self.snapshot(),
        });
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let source: Weak<dyn SnapshotSource> = Arc::downgrade(self) as Weak<QueueStore>;
        self.events.subscribe(source)
    }

    /// End all event streams; job state stays readable
    pub fn close_events(&self) {
        self.events.close();
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn len(&self) -> usize {
        self.table.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: JobId) -> Option<Arc<Mutex<Entry>>> {
        self.table.read().entries.get(&id).cloned()
    }
}

impl SnapshotSource for QueueStore {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::from_jobs(self.list())
    }
}
