// src/cli.rs

use clap::{value_parser, Arg, ArgAction, Command};

/// Build the command-line interface for the application
pub fn build_cli() -> Command {
    Command::new("mediaq")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Queue media downloads and watch them run")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("download")
                .about("Download one or more videos or audio tracks")
                .arg(
                    Arg::new("url")
                        .help("URLs to download; each becomes one queued job")
                        .required(true)
                        .num_args(1..)
                        .index(1),
                )
                .arg(
                    Arg::new("format")
                        .long("format")
                        .short('f')
                        .help("yt-dlp format id for video downloads")
                        .value_name("FORMAT_ID")
                        .default_value("bestvideo"),
                )
                .arg(
                    Arg::new("audio")
                        .long("audio")
                        .short('a')
                        .help("Extract audio only")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("codec")
                        .long("codec")
                        .help("Audio codec for --audio")
                        .value_parser(["mp3", "m4a", "opus", "wav", "flac"])
                        .default_value("mp3"),
                )
                .arg(
                    Arg::new("quality")
                        .long("quality")
                        .short('q')
                        .help("Audio quality for --audio (e.g., 320, 192, 128, best)")
                        .value_name("QUALITY")
                        .default_value("192"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .short('j')
                        .help("Maximum simultaneous downloads")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("output-dir")
                        .long("output-dir")
                        .short('o')
                        .help("Specify custom output directory")
                        .value_name("DIRECTORY"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .help("JSON configuration file")
                        .value_name("FILE"),
                )
                .arg(
                    Arg::new("ytdlp")
                        .long("ytdlp")
                        .help("Path to the yt-dlp executable")
                        .value_name("PATH"),
                )
                .arg(
                    Arg::new("events")
                        .long("events")
                        .help("Print queue events as server-sent event frames instead of progress bars")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Verify that yt-dlp is installed")
                .arg(
                    Arg::new("ytdlp")
                        .long("ytdlp")
                        .help("Path to the yt-dlp executable")
                        .value_name("PATH"),
                ),
        )
}
