// src/ytdlp.rs
// Acquisition engine backed by the yt-dlp executable

use crate::config::QueueConfig;
use crate::engine::{AcquisitionEngine, EngineOutcome, ProgressSink};
use crate::error::AppError;
use crate::job::{OutputMode, SourceReference};
use async_trait::async_trait;
use log::{debug, error, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as AsyncCommand;
use tokio_util::sync::CancellationToken;

const DOWNLOAD_PREFIX: &str = "download:";
const POSTPROCESS_PREFIX: &str = "postprocess:";
const OUTPUT_PREFIX: &str = "output:";

static PERCENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").unwrap());

/// One recognised line of yt-dlp stdout
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    Progress {
        percent: f64,
        speed: Option<String>,
        eta: Option<String>,
    },
    Processing,
    Output(PathBuf),
    Other,
}

/// Classify a stdout line produced with the templates from `YtDlpEngine::build_args`
pub fn parse_line(line: &str) -> EngineLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(DOWNLOAD_PREFIX) {
        let mut parts = rest.split('|');
        let percent = parts
            .next()
            .and_then(|p| PERCENT_REGEX.captures(p))
            .and_then(|caps| caps[1].parse::<f64>().ok());
        return match percent {
            Some(percent) => EngineLine::Progress {
                percent,
                speed: parts.next().and_then(known_value),
                eta: parts.next().and_then(known_value),
            },
            None => EngineLine::Other,
        };
    }

    if line.starts_with(POSTPROCESS_PREFIX) {
        return EngineLine::Processing;
    }

    if let Some(path) = line.strip_prefix(OUTPUT_PREFIX) {
        let path = path.trim();
        if !path.is_empty() && path != "NA" {
            return EngineLine::Output(PathBuf::from(path));
        }
    }

    EngineLine::Other
}

/// yt-dlp prints placeholders when speed or eta are not known yet
fn known_value(value: &str) -> Option<String> {
    let value = value.trim();
    match value {
        "" | "NA" | "N/A" | "None" => None,
        v if v.starts_with("Unknown") => None,
        v => Some(v.to_string()),
    }
}

/// Strip yt-dlp's `ERROR: ` prefix from a stderr line
fn error_message(line: &str) -> Option<String> {
    line.trim()
        .strip_prefix("ERROR:")
        .map(|msg| msg.trim().to_string())
        .filter(|msg| !msg.is_empty())
}

/// Runs one yt-dlp process per job
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary: String,
    output_dir: PathBuf,
    socket_timeout_secs: u64,
}

impl YtDlpEngine {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            output_dir: config.output_dir.clone(),
            socket_timeout_secs: config.socket_timeout_secs,
        }
    }

    /// Check that yt-dlp can be executed; returns its version string
    pub async fn probe(&self) -> Result<String, AppError> {
        let output = AsyncCommand::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => AppError::MissingDependency("yt-dlp".to_string()),
                _ => AppError::IoError(e),
            })?;

        if !output.status.success() {
            return Err(AppError::General(format!(
                "Failed to get {} version",
                self.binary
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(version)
    }

    /// Command line for one download, excluding the executable
    pub fn build_args(&self, source: &SourceReference) -> Vec<String> {
        let template = self.output_dir.join("%(title)s.%(ext)s");
        let mut args: Vec<String> = vec![
            "-o".into(),
            template.to_string_lossy().into_owned(),
            "--no-playlist".into(),
            "--newline".into(),
            "--progress".into(),
            "--no-colors".into(),
            "--progress-template".into(),
            format!(
                "{}%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s",
                DOWNLOAD_PREFIX
            ),
            "--progress-template".into(),
            format!("{}%(progress.status)s", POSTPROCESS_PREFIX),
            "--print".into(),
            format!("after_move:{}%(filepath)s", OUTPUT_PREFIX),
            "--socket-timeout".into(),
            self.socket_timeout_secs.to_string(),
        ];

        match &source.output {
            OutputMode::Audio { codec, quality } => {
                args.extend([
                    "-f".into(),
                    "bestaudio/best".into(),
                    "--extract-audio".into(),
                    "--audio-format".into(),
                    codec.clone(),
                ]);
                if quality != "best" {
                    args.extend(["--audio-quality".into(), quality.clone()]);
                }
            }
            OutputMode::Video => {
                args.extend([
                    "-f".into(),
                    format!("{}+bestaudio/best", source.format_id),
                    "--merge-output-format".into(),
                    "mp4".into(),
                ]);
            }
        }

        args.push(source.url.clone());
        args
    }
}

#[async_trait]
impl AcquisitionEngine for YtDlpEngine {
    async fn run(
        &self,
        source: &SourceReference,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> EngineOutcome {
        match self.download(source, progress, cancel).await {
            Ok(Some(output_path)) => EngineOutcome::Completed { output_path },
            Ok(None) => EngineOutcome::Cancelled,
            Err(e) => e.into(),
        }
    }
}

impl YtDlpEngine {
    /// Run yt-dlp to the end; `Ok(None)` when stopped by `cancel`
    async fn download(
        &self,
        source: &SourceReference,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<Option<PathBuf>, AppError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                AppError::EngineFailure(format!(
                    "Cannot create {}: {}",
                    self.output_dir.display(),
                    e
                ))
            })?;

        let mut command = AsyncCommand::new(&self.binary);
        command
            .args(self.build_args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("Running {:?}", command);

        let mut child = command.spawn().map_err(|e| {
            AppError::EngineFailure(match e.kind() {
                io::ErrorKind::NotFound => {
                    "yt-dlp executable not found. Please ensure it's installed and in your PATH."
                        .to_string()
                }
                _ => format!("Failed to execute yt-dlp command: {}", e),
            })
        })?;

        let stdout_task = child.stdout.take().map(|stdout| {
            let sink = progress.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut output_path = None;
                let mut processing = false;
                while let Ok(Some(line)) = lines.next_line().await {
                    match parse_line(&line) {
                        EngineLine::Progress { percent, speed, eta } => {
                            sink.progress(percent, speed, eta)
                        }
                        EngineLine::Processing if !processing => {
                            processing = true;
                            sink.processing();
                        }
                        EngineLine::Output(path) => output_path = Some(path),
                        _ => trace!("yt-dlp: {}", line),
                    }
                }
                output_path
            })
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut last_error = None;
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(message) = error_message(&line) {
                        last_error = Some(message);
                    } else {
                        debug!("yt-dlp: {}", line);
                    }
                }
                last_error
            })
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                debug!("Stopping yt-dlp for {}", source.url);
                if let Err(e) = child.kill().await {
                    error!("Failed to stop yt-dlp: {}", e);
                }
                return Ok(None);
            }
        };
        let status = status.map_err(|e| {
            AppError::EngineFailure(format!("Failed to complete download: {}", e))
        })?;

        let output_path = match stdout_task {
            Some(task) => task.await.ok().flatten(),
            None => None,
        };
        let last_error = match stderr_task {
            Some(task) => task.await.ok().flatten(),
            None => None,
        };

        if !status.success() {
            return Err(AppError::EngineFailure(last_error.unwrap_or_else(|| {
                format!("yt-dlp exited with code {}", status.code().unwrap_or(-1))
            })));
        }

        output_path
            .map(Some)
            .ok_or_else(|| AppError::EngineFailure("Could not locate downloaded file".to_string()))
    }
}
