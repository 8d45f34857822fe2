//! Synthetic event generator written in Rust
//!
//! Provides a cli for linting and running event generation pipelines using
//! a declarative yaml based configuration for producing timestamped,
//! templated events to one or more sinks.
use clap::{Parser, Subcommand};
use futures::future::join_all;
use inline_colorization::{color_green, color_red, color_reset};
use std::fs;
use std::process::ExitCode;
use tracing_subscriber::filter::EnvFilter;

use eventum::Runtime;

#[derive(Parser)]
#[command(name = "eventum", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate pipeline configuration files without running them
    Lint {
        /// Pipeline configuration files to check
        #[arg(short, long)]
        config: Vec<String>,
    },
    /// Run one or more pipelines until their inputs are exhausted
    Run {
        /// Pipeline configuration files to execute
        #[arg(short, long)]
        config: Vec<String>,
        /// Log verbosity of the pipeline stages
        #[arg(short, long, value_enum, default_value = "none")]
        log_level: LogLevel,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Default, Debug)]
enum LogLevel {
    Error,
    Info,
    Debug,
    Trace,
    #[default]
    None,
}

#[tokio::main]
async fn main() -> ExitCode {
    match Cli::parse().command {
        Command::Lint { config } => lint(&config).await,
        Command::Run { config, log_level } => run(&config, log_level).await,
    }
}

/// Reads and validates one configuration file, returning the pipeline
/// ready to run.
async fn load_pipeline(path: &str) -> Result<Runtime, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
    Runtime::from_config(&raw)
        .await
        .map_err(|e| format!("{path}: {e}"))
}

async fn lint(paths: &[String]) -> ExitCode {
    let mut failures = Vec::new();
    for path in paths {
        if let Err(reason) = load_pipeline(path).await {
            failures.push(reason);
        }
    }

    if failures.is_empty() {
        println!("{color_green}Configuration is valid{color_reset}");
        return ExitCode::SUCCESS;
    }

    for failure in failures {
        println!("{color_red}{failure}{color_reset}");
    }
    ExitCode::FAILURE
}

async fn run(paths: &[String], log_level: LogLevel) -> ExitCode {
    init_tracing(log_level);

    let mut pipelines = Vec::new();
    for path in paths {
        match load_pipeline(path).await {
            Ok(pipeline) => pipelines.push(pipeline),
            Err(reason) => {
                eprintln!("{color_red}{reason}{color_reset}");
                return ExitCode::FAILURE;
            }
        }
    }

    let results = join_all(pipelines.iter().map(Runtime::run)).await;

    let mut exit = ExitCode::SUCCESS;
    for ((path, pipeline), result) in paths.iter().zip(&pipelines).zip(results) {
        match result {
            Ok(()) => println!(
                "{color_green}{path}: {} events processed{color_reset}",
                pipeline.processed_events()
            ),
            Err(e) => {
                eprintln!("{color_red}{path}: {e}{color_reset}");
                exit = ExitCode::FAILURE;
            }
        }
    }
    exit
}

/// Installs the tracing subscriber for the pipeline stages. `RUST_LOG`
/// takes precedence over the flag when set.
fn init_tracing(log_level: LogLevel) {
    let directive = match log_level {
        LogLevel::Error => "eventum=error",
        LogLevel::Info => "eventum=info",
        LogLevel::Debug => "eventum=debug",
        LogLevel::Trace => "eventum=trace",
        LogLevel::None => return,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}
