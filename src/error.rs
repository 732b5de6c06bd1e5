// src/error.rs

use crate::job::{JobId, JobStatus};
use serde_json::Error as SerdeError;
use std::io;
use thiserror::Error;

/// Custom error types for the application
#[derive(Error, Debug)]
pub enum AppError {
    /// Enqueue input is structurally malformed; no job was created
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Operation referenced an unknown job id
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Operation is not permitted for the job's current status
    #[error("Cannot {operation} job {id} while it is {status}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        operation: &'static str,
    },

    /// The acquisition engine reported a failure
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// Error for missing dependencies
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] SerdeError),

    /// General application errors
    #[error("Application error: {0}")]
    General(String),
}

/// Convert a string error to AppError::General
impl From<String> for AppError {
    fn from(error: String) -> Self {
        AppError::General(error)
    }
}

/// Convert a &str error to AppError::General
impl From<&str> for AppError {
    fn from(error: &str) -> Self {
        AppError::General(error.to_string())
    }
}
