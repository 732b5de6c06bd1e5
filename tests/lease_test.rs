// tests/lease_test.rs
// Slot accounting when a job is retried before its previous worker has exited
mod common;

use common::*;
use log::{Level, LevelFilter, Log, Metadata, Record};
use mediaq::JobStatus;
use std::time::Duration;

/// Stalls the worker right after it records a failure, before its slot is released
struct SlowFailureLogger;

static LOGGER: SlowFailureLogger = SlowFailureLogger;

impl Log for SlowFailureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Error
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Error && record.args().to_string().contains("failed") {
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    fn flush(&self) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_before_slot_release_keeps_limit() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Error);

    let engine = ScriptedEngine::new();
    let manager = manager(&engine, 2);

    let first = manager.enqueue(descriptor("first")).unwrap();
    engine.next_run().await.fail("boom");

    // Retry while the failed attempt's worker still holds its slot
    wait_for_status(&manager, first, JobStatus::Failed).await;
    manager.retry(first).unwrap();
    assert!(manager.snapshot().active_downloads <= 2);

    let second = manager.enqueue(descriptor("second")).unwrap();
    let third = manager.enqueue(descriptor("third")).unwrap();
    assert!(manager.snapshot().active_downloads <= 2);

    // Once the old slot is released the retried job is admitted ahead of the third
    let mut runs = engine.next_runs(2).await;
    assert!(runs.contains_key(&url("first")));
    assert!(runs.contains_key(&url("second")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.active_downloads, 2);
    assert_eq!(manager.active_count(), 2);
    assert_eq!(manager.get(third).unwrap().status, JobStatus::Queued);

    // The new attempt owns its slot, so cancellation still reaches it
    manager.cancel(first).unwrap();
    wait_for_status(&manager, first, JobStatus::Cancelled).await;

    let run = engine.next_run().await;
    assert_eq!(run.url, url("third"));
    assert!(manager.active_count() <= 2);

    run.complete("/tmp/third.mp4");
    runs.remove(&url("second")).unwrap().complete("/tmp/second.mp4");
    wait_for_status(&manager, second, JobStatus::Completed).await;
    wait_for_status(&manager, third, JobStatus::Completed).await;
    wait_for_idle(&manager).await;
}
