// src/main.rs

use clap::ArgMatches;
use colored::*;
use env_logger::Builder;
use humansize::{format_size, BINARY};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, error, info, LevelFilter};
use mediaq::cli::build_cli;
use mediaq::{
    AppError, Descriptor, Job, JobId, JobStatus, QueueConfig, QueueEvent, QueueManager,
    YtDlpEngine,
};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    init_logger();
    info!("mediaq starting up - version {}", env!("CARGO_PKG_VERSION"));

    let matches = build_cli().get_matches();
    let result = match matches.subcommand() {
        Some(("download", sub)) => run_download(sub).await,
        Some(("check", sub)) => run_check(sub).await,
        _ => Ok(true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Config file first, then command-line overrides
fn load_config(matches: &ArgMatches) -> Result<QueueConfig, AppError> {
    let mut config = match matches.try_get_one::<String>("config").ok().flatten() {
        Some(path) => QueueConfig::load(&PathBuf::from(path))?,
        None => QueueConfig::default(),
    };

    if let Some(limit) = matches.try_get_one::<usize>("concurrency").ok().flatten() {
        config.max_concurrent = *limit;
    }
    if let Some(dir) = matches.try_get_one::<String>("output-dir").ok().flatten() {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(path) = matches.get_one::<String>("ytdlp") {
        config.ytdlp_path = path.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run_check(matches: &ArgMatches) -> Result<bool, AppError> {
    let config = load_config(matches)?;
    let version = YtDlpEngine::new(&config).probe().await?;
    println!("{} yt-dlp {}", "✓".green(), version);
    Ok(true)
}

fn descriptors_from(matches: &ArgMatches) -> Vec<Descriptor> {
    let audio = matches.get_flag("audio");
    let format = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("bestvideo");
    let codec = matches.get_one::<String>("codec").map(String::as_str);
    let quality = matches.get_one::<String>("quality").map(String::as_str);

    matches
        .get_many::<String>("url")
        .into_iter()
        .flatten()
        .map(|url| {
            let builder = Descriptor::builder(url).title(url);
            if audio {
                builder.audio(codec, quality).build()
            } else {
                builder.format(format, format).build()
            }
        })
        .collect()
}

async fn run_download(matches: &ArgMatches) -> Result<bool, AppError> {
    let config = load_config(matches)?;
    let engine = YtDlpEngine::new(&config);
    let version = engine.probe().await?;
    debug!("Using yt-dlp {}", version);

    let manager = QueueManager::new(Arc::new(engine), &config)?;
    let events_mode = matches.get_flag("events");

    // Subscribe before enqueueing so no transition is missed
    let mut subscription = manager.subscribe();

    let descriptors = descriptors_from(matches);
    let urls: Vec<String> = descriptors.iter().map(|d| d.source.url.clone()).collect();

    let mut pending: HashSet<JobId> = HashSet::new();
    for (url, result) in urls.iter().zip(manager.enqueue_batch(descriptors)) {
        match result {
            Ok(id) => {
                pending.insert(id);
            }
            Err(e) => eprintln!("{} {}: {}", "Skipped".yellow(), url, e),
        }
    }

    if pending.is_empty() {
        return Ok(false);
    }
    let ids: Vec<JobId> = pending.iter().copied().collect();

    println!(
        "{}",
        format!(
            "Queued {} download(s), {} at a time → {}",
            pending.len(),
            config.max_concurrent,
            config.output_dir.display()
        )
        .cyan()
    );

    let mut display = ProgressDisplay::new();
    while !pending.is_empty() {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if events_mode {
                    print!("{}", event.sse_frame()?);
                    std::io::stdout().flush()?;
                }
                for job in jobs_in(&event) {
                    if !pending.contains(&job.id) {
                        continue;
                    }
                    if !events_mode {
                        display.render(job);
                    }
                    if job.is_terminal() {
                        pending.remove(&job.id);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Cancelling downloads...".yellow());
                manager.cancel_all();
            }
        }
    }

    subscription.unsubscribe();
    manager.shutdown().await;
    Ok(print_summary(&manager, &ids))
}

fn jobs_in(event: &QueueEvent) -> Vec<&Job> {
    match event {
        QueueEvent::FullUpdate { queue } => queue.items.iter().collect(),
        QueueEvent::ItemUpdate { item, removed: false } => vec![item],
        QueueEvent::ItemUpdate { .. } => Vec::new(),
    }
}

/// Returns true when every job completed
fn print_summary(manager: &QueueManager, ids: &[JobId]) -> bool {
    let mut all_completed = true;
    println!();
    for id in ids {
        let Ok(job) = manager.get(*id) else { continue };
        match job.status {
            JobStatus::Completed => {
                let path = job.output_path.unwrap_or_default();
                let size = std::fs::metadata(&path)
                    .map(|m| format_size(m.len(), BINARY))
                    .unwrap_or_else(|_| "unknown size".to_string());
                println!("{} {} ({})", "✓".green(), path.display(), size);
            }
            JobStatus::Failed => {
                all_completed = false;
                println!(
                    "{} {}: {}",
                    "✗".red(),
                    job.source.url,
                    job.error_message.unwrap_or_default().red()
                );
            }
            status => {
                all_completed = false;
                println!("{} {}: {}", "-".yellow(), job.source.url, status);
            }
        }
    }
    all_completed
}

/// One progress bar per job
struct ProgressDisplay {
    multi: MultiProgress,
    bars: HashMap<JobId, ProgressBar>,
}

impl ProgressDisplay {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn render(&mut self, job: &Job) {
        let multi = &self.multi;
        let bar = self.bars.entry(job.id).or_insert_with(|| {
            let style = ProgressStyle::with_template(
                "{prefix:30!} [{bar:40.cyan/blue}] {pos:>3}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style);
            bar.set_prefix(job.metadata.title.clone());
            bar
        });

        bar.set_position(job.progress.round() as u64);
        let message = match job.status {
            JobStatus::Downloading => format!(
                "{} ETA {}",
                job.speed.as_deref().unwrap_or("--"),
                job.eta.as_deref().unwrap_or("--")
            ),
            JobStatus::Completed => "done".green().to_string(),
            JobStatus::Failed => job
                .error_message
                .clone()
                .unwrap_or_else(|| "failed".to_string())
                .red()
                .to_string(),
            status => status.to_string(),
        };
        bar.set_message(message);

        if job.is_terminal() {
            bar.finish();
        }
    }
}

fn init_logger() {
    // Create a custom logger builder
    let mut builder = Builder::from_default_env();

    // Set the default level based on debug/release mode
    if cfg!(debug_assertions) {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.filter_level(LevelFilter::Info);
    }

    // Define a custom format with timestamp, level, module, and message
    builder.format(|buf, record| {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(
            buf,
            "[{} {} {}] {}",
            timestamp,
            record.level().to_string().to_uppercase(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    // Allow override through RUST_LOG environment variable
    builder.parse_env("RUST_LOG");

    builder.init();
}
