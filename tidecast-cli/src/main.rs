//! Tidecast CLI - Command-line interface
//!
//! Relays local files, standard input and web links to a remote playback
//! controller.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tidecast_core::CastError;
use tidecast_core::tracing_setup::{CliLogLevel, init_tracing};
use tracing::Level;

/// Time allowed for background tasks once a command has finished.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Main CLI structure for Tidecast.
#[derive(Parser)]
#[command(name = "tidecast")]
#[command(about = "Play local media on a remote playback controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    #[command(flatten)]
    overrides: commands::Overrides,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Verbose output (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory receiving a full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        cli.log_level.as_tracing_level()
    };
    if let Err(e) = init_tracing(level, cli.logs_dir.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(commands::handle_command(
        cli.command,
        cli.config.as_deref(),
        &cli.overrides,
    ));
    // Reads of standard input park a blocking thread that never returns.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report(&error),
    }
}

fn report(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<CastError>() {
        Some(cast) => {
            tracing::error!("{cast}");
            eprintln!("Error: {}", cast.user_message());
        }
        None => eprintln!("Error: {error:#}"),
    }
    ExitCode::from(exit_status(error))
}

fn exit_status(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<CastError>()
        .map_or(1, CastError::exit_code)
}
