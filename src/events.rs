// src/events.rs
// Fan-out of job state changes to any number of observers

use crate::job::{Job, JobId, JobStatus};
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Weak;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Comment frame for idle event streams
pub const KEEPALIVE_FRAME: &str = ": keepalive\n\n";

/// Full, ordered listing of the queue plus aggregate counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<Job>,
    pub active_downloads: usize,
    pub queued_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
}

impl QueueSnapshot {
    pub fn from_jobs(items: Vec<Job>) -> Self {
        let count = |f: fn(JobStatus) -> bool| items.iter().filter(|job| f(job.status)).count();
        let active_downloads = count(JobStatus::is_active);
        let queued_count = count(|s| s == JobStatus::Queued);
        let completed_count = count(|s| s == JobStatus::Completed);
        let failed_count = count(|s| s == JobStatus::Failed);

        Self {
            items,
            active_downloads,
            queued_count,
            completed_count,
            failed_count,
        }
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.items.iter().find(|job| job.id == id)
    }
}

/// Message delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    FullUpdate { queue: QueueSnapshot },
    ItemUpdate { item: Job, removed: bool },
}

impl QueueEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Server-sent events frame carrying this event
    pub fn sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }
}

/// Anything able to produce a consistent queue listing
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> QueueSnapshot;
}

/// Publish/subscribe registry with a bounded buffer per subscriber.
///
/// Publishing never waits on observers. A subscriber that falls more than
/// `capacity` events behind loses the oldest ones and is resynchronised with
/// a fresh `full_update` taken from the store.
///
/// After `close`, or once the broadcaster is dropped, subscribers drain what
/// is already buffered and then see the end of the stream.
#[derive(Debug)]
pub struct Broadcaster {
    tx: RwLock<Option<broadcast::Sender<QueueEvent>>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: RwLock::new(Some(tx)),
        }
    }

    pub fn publish(&self, event: QueueEvent) {
        if let Some(tx) = self.tx.read().as_ref() {
            // Err only means nobody is listening
            let _ = tx.send(event);
        }
    }

    /// End every subscriber's stream; later events are discarded
    pub fn close(&self) {
        if self.tx.write().take().is_some() {
            debug!("Event stream closed");
        }
    }

    /// Register an observer; its first event is a snapshot of `source`
    pub fn subscribe(&self, source: Weak<dyn SnapshotSource>) -> Subscription {
        // Subscribe before snapshotting so nothing committed afterwards is missed
        let rx = match self.tx.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                // Already closed: the stream is just the bootstrap snapshot
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        };
        let snapshot = source
            .upgrade()
            .map(|source| source.snapshot())
            .unwrap_or_default();
        debug!(
            "Observer subscribed ({} jobs in bootstrap snapshot)",
            snapshot.items.len()
        );

        let mut subscription = Subscription {
            rx,
            source,
            pending: None,
            seen: HashMap::new(),
        };
        subscription.resync(snapshot);
        subscription
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.read().as_ref().map_or(0, |tx| tx.receiver_count())
    }
}

enum Received {
    Event(QueueEvent),
    Lagged(u64),
}

enum Accepted {
    Deliver(QueueEvent),
    Skip,
    Closed,
}

/// One observer's private, ordered event stream
pub struct Subscription {
    rx: broadcast::Receiver<QueueEvent>,
    /// Weak so an open subscription does not keep the queue alive
    source: Weak<dyn SnapshotSource>,
    pending: Option<QueueEvent>,
    /// Latest revision delivered per job
    seen: HashMap<JobId, u64>,
}

impl Subscription {
    /// Next event, or `None` once the queue has shut down or been dropped
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }

        loop {
            let received = match self.rx.recv().await {
                Ok(event) => Received::Event(event),
                Err(RecvError::Lagged(skipped)) => Received::Lagged(skipped),
                Err(RecvError::Closed) => return None,
            };
            match self.accept(received) {
                Accepted::Deliver(event) => return Some(event),
                Accepted::Skip => {}
                Accepted::Closed => return None,
            }
        }
    }

    /// Non-blocking variant of `recv`; `None` when nothing is buffered
    pub fn try_recv(&mut self) -> Option<QueueEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }

        loop {
            let received = match self.rx.try_recv() {
                Ok(event) => Received::Event(event),
                Err(TryRecvError::Lagged(skipped)) => Received::Lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            };
            match self.accept(received) {
                Accepted::Deliver(event) => return Some(event),
                Accepted::Skip => {}
                Accepted::Closed => return None,
            }
        }
    }

    /// Filter stale updates and turn gaps into snapshots
    fn accept(&mut self, received: Received) -> Accepted {
        match received {
            Received::Event(QueueEvent::ItemUpdate { item, removed }) => {
                if self.seen.get(&item.id).is_some_and(|&rev| item.revision <= rev) {
                    return Accepted::Skip;
                }
                if removed {
                    self.seen.remove(&item.id);
                } else {
                    self.seen.insert(item.id, item.revision);
                }
                Accepted::Deliver(QueueEvent::ItemUpdate { item, removed })
            }
            // A published listing may predate item updates already delivered
            Received::Event(QueueEvent::FullUpdate { .. }) => self.refresh(),
            Received::Lagged(skipped) => {
                warn!("Observer lagged by {} events, resending snapshot", skipped);
                self.refresh()
            }
        }
    }

    /// Replace the observer's view with a fresh listing from the store
    fn refresh(&mut self) -> Accepted {
        let Some(source) = self.source.upgrade() else {
            return Accepted::Closed;
        };
        self.resync(source.snapshot());
        match self.pending.take() {
            Some(event) => Accepted::Deliver(event),
            None => Accepted::Skip,
        }
    }

    /// Release this observer's buffer
    pub fn unsubscribe(self) {
        debug!("Observer unsubscribed");
    }

    fn resync(&mut self, snapshot: QueueSnapshot) {
        self.seen = snapshot
            .items
            .iter()
            .map(|job| (job.id, job.revision))
            .collect();
        self.pending = Some(QueueEvent::FullUpdate { queue: snapshot });
    }
}
