// src/lib.rs
// Download queue manager: bounded concurrent execution, cancellation, retry
// and live progress events for media downloads

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod manager;
pub mod scheduler;
pub mod store;
pub mod worker;
pub mod ytdlp;

pub use config::QueueConfig;
pub use engine::{AcquisitionEngine, EngineOutcome, ProgressSink};
pub use error::AppError;
pub use events::{QueueEvent, QueueSnapshot, Subscription, KEEPALIVE_FRAME};
pub use job::{Descriptor, DisplayMetadata, Job, JobId, JobStatus, OutputMode, SourceReference};
pub use manager::QueueManager;
pub use ytdlp::YtDlpEngine;
