// src/config.rs

use crate::error::AppError;
use dirs_next as dirs;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for the queue and the yt-dlp engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of jobs downloading or processing at once
    pub max_concurrent: usize,
    /// Events buffered per observer before it is resynchronised with a snapshot
    pub event_buffer: usize,
    /// Where finished files are written
    pub output_dir: PathBuf,
    /// yt-dlp executable name or path
    pub ytdlp_path: String,
    pub socket_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3, // Default to 3 concurrent downloads
            event_buffer: 100,
            output_dir: default_output_dir(),
            ytdlp_path: "yt-dlp".to_string(),
            socket_timeout_secs: 30,
        }
    }
}

impl QueueConfig {
    /// Read a JSON config file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path)?;
        let config: QueueConfig = serde_json::from_str(&json)?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_concurrent == 0 {
            return Err(AppError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(AppError::Config(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if self.ytdlp_path.trim().is_empty() {
            return Err(AppError::Config("ytdlp_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = output_dir;
        self
    }
}

/// `<downloads>/mediaq`, or `./downloads` when the platform has no download dir
fn default_output_dir() -> PathBuf {
    match dirs::download_dir() {
        Some(mut path) => {
            path.push("mediaq");
            path
        }
        None => PathBuf::from("downloads"),
    }
}
