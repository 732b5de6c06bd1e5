// src/job.rs
// Job records, the descriptors they are created from, and the status state machine

use crate::error::AppError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

static URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("static url pattern"));

/// Unique job identifier, never reused within a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| AppError::General(format!("Invalid job id '{}': {}", s, e)))
    }
}

/// Current status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl JobStatus {
    /// Downloading or processing; counts against the concurrency limit
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the job state machine
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Downloading, Processing)
                | (Downloading | Processing, Completed)
                | (Downloading | Processing, Failed)
                | (Queued | Downloading | Processing, Cancelled)
                | (Failed | Cancelled, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// How the fetched media is turned into an output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutputMode {
    /// Selected video format merged with the best audio track
    Video,
    /// Best audio track converted to `codec`
    Audio { codec: String, quality: String },
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::Video
    }
}

impl OutputMode {
    pub fn audio(codec: Option<&str>, quality: Option<&str>) -> Self {
        Self::Audio {
            codec: codec.unwrap_or("mp3").to_string(),
            quality: quality.unwrap_or("192").to_string(),
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }
}

/// What to fetch and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReference {
    pub url: String,
    pub format_id: String,
    #[serde(default)]
    pub format_label: String,
    #[serde(default)]
    pub output: OutputMode,
}

/// Informational fields shown to observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<u64>,
}

/// Immutable enqueue input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub source: SourceReference,
    #[serde(default)]
    pub metadata: DisplayMetadata,
}

impl Descriptor {
    /// Create a new descriptor builder
    pub fn builder(url: &str) -> DescriptorBuilder {
        DescriptorBuilder::new(url)
    }

    /// Reject descriptors that cannot be handed to an engine
    pub fn validate(&self) -> Result<(), AppError> {
        let url = self.source.url.trim();
        if url.is_empty() {
            return Err(AppError::InvalidDescriptor("missing source url".to_string()));
        }
        if !URL_REGEX.is_match(url) {
            return Err(AppError::InvalidDescriptor(format!(
                "unsupported source url: {}",
                url
            )));
        }
        match &self.source.output {
            OutputMode::Video if self.source.format_id.trim().is_empty() => Err(
                AppError::InvalidDescriptor("video download requires a format id".to_string()),
            ),
            OutputMode::Audio { codec, .. } if codec.trim().is_empty() => Err(
                AppError::InvalidDescriptor("audio download requires a codec".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Builder for creating descriptors with fluent interface
#[derive(Debug)]
pub struct DescriptorBuilder {
    descriptor: Descriptor,
}

impl DescriptorBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            descriptor: Descriptor {
                source: SourceReference {
                    url: url.to_string(),
                    format_id: "best".to_string(),
                    format_label: String::new(),
                    output: OutputMode::Video,
                },
                metadata: DisplayMetadata::default(),
            },
        }
    }

    /// Set the yt-dlp format id and its human label
    pub fn format(mut self, format_id: &str, label: &str) -> Self {
        self.descriptor.source.format_id = format_id.to_string();
        self.descriptor.source.format_label = label.to_string();
        self
    }

    /// Extract audio only
    pub fn audio(mut self, codec: Option<&str>, quality: Option<&str>) -> Self {
        self.descriptor.source.output = OutputMode::audio(codec, quality);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.descriptor.metadata.title = title.to_string();
        self
    }

    pub fn video_id(mut self, video_id: Option<&str>) -> Self {
        self.descriptor.metadata.video_id = video_id.map(|s| s.to_string());
        self
    }

    pub fn thumbnail(mut self, thumbnail: Option<&str>) -> Self {
        self.descriptor.metadata.thumbnail = thumbnail.map(|s| s.to_string());
        self
    }

    pub fn duration(mut self, seconds: Option<u64>) -> Self {
        self.descriptor.metadata.duration = seconds;
        self
    }

    pub fn build(self) -> Descriptor {
        self.descriptor
    }
}

/// A download job in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for the job
    pub id: JobId,
    /// What to fetch
    pub source: SourceReference,
    /// Title, thumbnail and duration
    pub metadata: DisplayMetadata,
    /// Current job status
    pub status: JobStatus,
    /// Current progress (0-100)
    pub progress: f64,
    /// Engine-formatted transfer speed
    pub speed: Option<String>,
    /// Engine-formatted time remaining
    pub eta: Option<String>,
    /// Error message if failed
    pub error_message: Option<String>,
    /// Output file path once completed
    pub output_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Cooperative stop flag, cleared on retry
    pub cancel_requested: bool,
    /// Number of execution attempts started
    pub attempts: u32,
    /// Bumped on every committed mutation
    pub revision: u64,
}

impl Job {
    /// Create a queued job from a validated descriptor
    pub fn new(descriptor: Descriptor) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source: descriptor.source,
            metadata: descriptor.metadata,
            status: JobStatus::Queued,
            progress: 0.0,
            speed: None,
            eta: None,
            error_message: None,
            output_path: None,
            created_at: now,
            updated_at: now,
            cancel_requested: false,
            attempts: 0,
            revision: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus, operation: &'static str) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidState {
                id: self.id,
                status: self.status,
                operation,
            });
        }
        self.status = next;
        Ok(())
    }

    /// queued -> downloading, starting a fresh execution attempt
    pub fn mark_started(&mut self) -> Result<(), AppError> {
        self.transition(JobStatus::Downloading, "start")?;
        self.progress = 0.0;
        self.speed = None;
        self.eta = None;
        self.attempts += 1;
        Ok(())
    }

    /// Apply an engine progress report; progress never moves backwards within an attempt
    pub fn update_progress(
        &mut self,
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    ) -> Result<(), AppError> {
        if !self.is_active() {
            return Err(AppError::InvalidState {
                id: self.id,
                status: self.status,
                operation: "report progress for",
            });
        }
        let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        self.progress = self.progress.max(percent);
        self.speed = speed;
        self.eta = eta;
        Ok(())
    }

    /// downloading -> processing
    pub fn mark_processing(&mut self) -> Result<(), AppError> {
        self.transition(JobStatus::Processing, "post-process")?;
        self.progress = 100.0;
        self.speed = None;
        self.eta = None;
        Ok(())
    }

    pub fn mark_completed(&mut self, output_path: PathBuf) -> Result<(), AppError> {
        self.transition(JobStatus::Completed, "complete")?;
        self.progress = 100.0;
        self.speed = None;
        self.eta = None;
        self.output_path = Some(output_path);
        Ok(())
    }

    pub fn mark_failed(&mut self, message: String) -> Result<(), AppError> {
        self.transition(JobStatus::Failed, "fail")?;
        self.speed = None;
        self.eta = None;
        self.error_message = Some(message);
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), AppError> {
        self.transition(JobStatus::Cancelled, "cancel")?;
        self.speed = None;
        self.eta = None;
        Ok(())
    }

    /// failed|cancelled -> queued; the previous attempt's partial output is discarded
    pub fn reset_for_retry(&mut self) -> Result<(), AppError> {
        self.transition(JobStatus::Queued, "retry")?;
        self.progress = 0.0;
        self.speed = None;
        self.eta = None;
        self.error_message = None;
        self.output_path = None;
        self.cancel_requested = false;
        Ok(())
    }

    /// Record a committed mutation
    pub(crate) fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now().max(self.updated_at);
    }
}
