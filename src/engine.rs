// src/engine.rs
// Contract between the queue and whatever actually fetches media

use crate::error::AppError;
use crate::job::SourceReference;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a single engine run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Completed { output_path: PathBuf },
    Failed { message: String },
    Cancelled,
}

/// Engine-side errors become a failed run; `EngineFailure` keeps its bare message
impl From<AppError> for EngineOutcome {
    fn from(error: AppError) -> Self {
        let message = match error {
            AppError::EngineFailure(message) => message,
            other => other.to_string(),
        };
        EngineOutcome::Failed { message }
    }
}

/// Receives progress from a running engine.
///
/// Every call is a cancellation checkpoint: once the job has been asked to
/// stop, the run's `CancellationToken` is triggered and further reports are
/// ignored.
pub trait ProgressSink: Send + Sync {
    /// `percent` in 0..=100; speed and eta are engine-formatted strings
    fn progress(&self, percent: f64, speed: Option<String>, eta: Option<String>);

    /// The raw fetch is done and post-processing (merge, transcode) has begun
    fn processing(&self);

    /// Whether the run should stop as soon as possible
    fn is_cancelled(&self) -> bool;
}

/// Executes one acquisition.
///
/// Implementations must watch `cancel` and return `EngineOutcome::Cancelled`
/// once they have actually stopped. Faults should be reported as
/// `EngineOutcome::Failed`; a panic is caught by the worker and recorded as a
/// generic failure.
#[async_trait]
pub trait AcquisitionEngine: Send + Sync {
    async fn run(
        &self,
        source: &SourceReference,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> EngineOutcome;
}
