mod bus;
mod config;
mod export;
mod sampler;
mod store;
mod web;

use chrono::DateTime;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;

use crate::config::{Config, IntervalPreset, SourceConfig};
use crate::export::ExportFormat;
use crate::sampler::{Fix, PushSource, ReplaySource, Sampler, SamplerError, SamplerEvent};
use crate::store::{Sample, SampleStore};

#[derive(Parser)]
#[command(name = "loc-o-mat")]
#[command(about = "Periodic location capture and history")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "loc-o-mat.yaml")]
    config: String,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate,
    /// Run the HTTP API
    Serve,
    /// Capture from the configured source until interrupted
    Record {
        /// Override the configured interval
        #[arg(long, value_enum)]
        every: Option<IntervalPreset>,
    },
    /// Inspect or clear stored samples
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Write the history to a file
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output folder, the configured export folder by default
        #[arg(long)]
        out: Option<String>,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// List samples, most recent first
    List {
        /// Lower bound (RFC 3339 or ms since epoch)
        #[arg(long, value_parser = parse_time)]
        start: Option<i64>,
        /// Upper bound (RFC 3339 or ms since epoch)
        #[arg(long, value_parser = parse_time)]
        end: Option<i64>,
    },
    /// Print the number of stored samples
    Count,
    /// Delete every stored sample
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn parse_time(raw: &str) -> Result<i64, String> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_millis())
        .map_err(|e| format!("expected RFC 3339 time or milliseconds: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config {}: {}", cli.config, e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate => validate(&config),
        Commands::Serve => serve(config),
        Commands::Record { every } => record(config, every),
        Commands::History { command } => history(&config, command),
        Commands::Export { format, out } => export_history(&config, format, out),
    }
}

fn validate(config: &Config) -> ExitCode {
    println!("Configuration is valid");
    println!("  storage: {}", config.storage.path.display());
    println!(
        "  interval: {} ({} accuracy)",
        humantime::format_duration(config.tracking.interval),
        config.tracking_accuracy()
    );
    match &config.source {
        SourceConfig::Push => println!("  source: push"),
        SourceConfig::Replay { path, repeat } => match ReplaySource::from_file(path, *repeat) {
            Ok(replay) => println!(
                "  source: replay of {} fixes from {}{}",
                replay.len(),
                path.display(),
                if *repeat { ", repeating" } else { "" }
            ),
            Err(e) => {
                eprintln!("Error loading replay {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}

fn runtime() -> Option<tokio::runtime::Runtime> {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => Some(rt),
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            None
        }
    }
}

fn serve(config: Config) -> ExitCode {
    let Some(rt) = runtime() else {
        return ExitCode::FAILURE;
    };
    match rt.block_on(web::run_server(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn record(config: Config, every: Option<IntervalPreset>) -> ExitCode {
    let mut tracking = config.tracking.clone();
    if let Some(preset) = every {
        tracking.interval = preset.duration();
    }
    let session = match tracking.session() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid interval: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let store = match SampleStore::open(&config.storage.path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Error opening {}: {}", config.storage.path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let (source, push) = match config.source.open() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error opening fix source: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let Some(rt) = runtime() else {
        return ExitCode::FAILURE;
    };

    let result = rt.block_on(async {
        let mut sampler = Sampler::new(store.clone(), source);
        sampler.samples().subscribe(|s: &Sample| {
            println!("Lat: {:.6}, Lng: {:.6} (±{:.1} m)", s.latitude, s.longitude, s.accuracy);
            Ok(())
        });
        sampler.events().subscribe(|event: &SamplerEvent| {
            match event {
                SamplerEvent::Starting { interval_ms } => {
                    println!("Tracking every {} seconds", interval_ms / 1000)
                }
                SamplerEvent::Active => println!("Tracking active"),
                SamplerEvent::Unavailable { reason } => println!("Tracking unavailable: {}", reason),
                SamplerEvent::Stopped => println!("Tracking stopped"),
            }
            Ok(())
        });

        sampler.start_session(session).await?;
        if let Some(push) = push {
            feed_stdin(push);
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl-C: {}", e);
        }
        sampler.stop().await;
        Ok::<_, SamplerError>(())
    });
    // The stdin reader may still be blocked on a read.
    rt.shutdown_background();

    if let Err(e) = store.flush() {
        log::error!("Failed to flush samples: {}", e);
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Reads one JSON fix per line from stdin into the push source.
fn feed_stdin(push: PushSource) {
    tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Fix>(&line) {
                Ok(fix) => {
                    if let Err(e) = push.push(fix) {
                        log::warn!("Fix dropped: {}", e);
                    }
                }
                Err(e) => log::warn!("Invalid fix {:?}: {}", line, e),
            }
        }
    });
}

fn open_store(config: &Config) -> Option<SampleStore> {
    match SampleStore::open(&config.storage.path) {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("Error opening {}: {}", config.storage.path.display(), e);
            None
        }
    }
}

fn history(config: &Config, command: HistoryCommand) -> ExitCode {
    let Some(store) = open_store(config) else {
        return ExitCode::FAILURE;
    };

    let result = match command {
        HistoryCommand::List { start, end } => {
            let samples = match (start, end) {
                (None, None) => store.list_all(),
                (start, end) => {
                    store.list_by_range(start.unwrap_or(i64::MIN), end.unwrap_or(i64::MAX))
                }
            };
            samples.map(|samples| {
                for s in &samples {
                    let when = s
                        .local_time()
                        .map(|t| t.format("%d/%m/%y %H:%M").to_string())
                        .unwrap_or_else(|| s.timestamp.to_string());
                    println!(
                        "{}  {:.6}, {:.6}  Precisión: {:.1} m",
                        when, s.latitude, s.longitude, s.accuracy
                    );
                }
                println!("Registros: {}", samples.len());
            })
        }
        HistoryCommand::Count => store.count().map(|n| println!("{}", n)),
        HistoryCommand::Clear { yes } => {
            if !yes {
                eprintln!("Refusing to delete {} without --yes", store.path().display());
                return ExitCode::FAILURE;
            }
            store
                .delete_all()
                .map(|n| println!("Deleted {} samples", n))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Storage error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn export_history(config: &Config, format: ExportFormat, out: Option<String>) -> ExitCode {
    let Some(store) = open_store(config) else {
        return ExitCode::FAILURE;
    };
    let samples = match store.list_all() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Storage error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let folder = out
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| config.export.folder.clone());

    match export::export_to_dir(&folder, &samples, format) {
        Ok(path) => {
            println!("Exported {} samples to {}", samples.len(), path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Export failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millis_and_rfc3339() {
        assert_eq!(parse_time("1700000000000"), Ok(1_700_000_000_000));
        assert_eq!(
            parse_time("2023-11-14T22:13:20Z"),
            Ok(1_700_000_000_000)
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn cli_parses_history_range() {
        let cli = Cli::try_parse_from([
            "loc-o-mat",
            "history",
            "list",
            "--start",
            "100",
            "--end",
            "200",
        ])
        .unwrap();
        match cli.command {
            Commands::History {
                command: HistoryCommand::List { start, end },
            } => {
                assert_eq!(start, Some(100));
                assert_eq!(end, Some(200));
            }
            _ => panic!("unexpected command"),
        }
    }
}
