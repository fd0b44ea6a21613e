//! extlife - replay and inspect extension background-context lifecycles
//!
//! ```text
//! extlife replay <scenario.toml> [--format json|pretty]
//! extlife config check <extlife.toml>
//! extlife config default
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use extlife_core::config::{Config, LogFormat};
use extlife_core::error::format_error_with_remediation;
use extlife_core::logging::init_logging;
use extlife_core::scenario::{Scenario, Transcript};

#[derive(Parser, Debug)]
#[command(
    name = "extlife",
    version,
    about = "Replay and inspect extension background-context lifecycles"
)]
struct Cli {
    /// Configuration file (logging section applies to this process)
    #[arg(long, global = true, env = "EXTLIFE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter; RUST_LOG takes precedence
    #[arg(long, global = true, env = "EXTLIFE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a TOML scenario and print its transcript
    Replay {
        /// Scenario file
        scenario: PathBuf,

        /// Transcript format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validate a configuration file
    Check {
        /// Path to extlife.toml
        path: PathBuf,
    },
    /// Print the default configuration
    Default,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Pretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(core) = err.downcast_ref::<extlife_core::Error>() {
                eprintln!("{}", format_error_with_remediation(core));
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path).map_err(extlife_core::Error::from)?,
        None => Config::default(),
    };

    let mut log = config.logging.clone();
    if cli.config.is_none() {
        log.level = "warn".to_string();
    }
    if let Some(level) = cli.log_level {
        log.level = level;
    }
    if let Some(format) = cli.log_format {
        log.format = format;
    }
    init_logging(&log).context("failed to initialize logging")?;

    match cli.command {
        Commands::Replay { scenario, format } => replay(&scenario, format),
        Commands::Config { command } => match command {
            ConfigCommands::Check { path } => check_config(&path),
            ConfigCommands::Default => {
                let text = Config::default()
                    .to_toml_string()
                    .map_err(extlife_core::Error::from)?;
                print!("{text}");
                Ok(())
            }
        },
    }
}

fn replay(path: &Path, format: OutputFormat) -> Result<()> {
    let scenario = Scenario::load(path)?;
    tracing::info!(scenario = %scenario.name, steps = scenario.steps.len(), "replaying scenario");
    let transcript = scenario.replay()?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&transcript)?);
        }
        OutputFormat::Pretty => print_pretty(&transcript)?,
    }
    Ok(())
}

fn print_pretty(transcript: &Transcript) -> Result<()> {
    println!("scenario: {}", transcript.name);
    for step in &transcript.steps {
        println!(
            "[{:>3}] {:>8}ms  {:<22} {}",
            step.index, step.at_ms, step.op, step.outcome
        );
        for message in &step.messages {
            println!("             -> {}", serde_json::to_string(message)?);
        }
        for event in &step.events {
            println!("             ** {}", serde_json::to_string(event)?);
        }
    }
    println!();
    for state in &transcript.extensions {
        let count = state
            .keepalive_count
            .map_or_else(|| "-".to_string(), |count| count.to_string());
        let phase = state
            .phase
            .map_or_else(|| "-".to_string(), |phase| phase.to_string());
        println!(
            "{}: context={} closing={} keepalive={} phase={}",
            state.extension_id, state.has_context, state.closing, count, phase
        );
    }
    let metrics = &transcript.metrics;
    println!(
        "contexts created={} destroyed={}  should_suspend={} suspend={} cancel_suspend={}  stale_acks={}",
        metrics.contexts_created,
        metrics.contexts_destroyed,
        metrics.should_suspend_sent,
        metrics.suspend_sent,
        metrics.cancel_suspend_sent,
        metrics.stale_acks_dropped
    );
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = Config::load(path).map_err(extlife_core::Error::from)?;
    println!("OK: {}", path.display());
    println!(
        "  idle_delay_ms={} suspending_time_ms={} late_activity={}",
        config.lifecycle.idle_delay_ms,
        config.lifecycle.suspending_time_ms,
        config.lifecycle.late_activity.as_str()
    );
    Ok(())
}
