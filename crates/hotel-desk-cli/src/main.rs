//! Hotel Desk - command-line client for the front desk session.
//!
//! Logs in against the backend, keeps the session's access token fresh and
//! logs out.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hotel_desk_core::Config;

/// Log file prefix inside the data directory; rotated daily
const LOG_FILE_PREFIX: &str = "hotel-desk.log";

fn env_filter() -> EnvFilter {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize the tracing subscriber for logging to stderr
fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter())
        .init();
}

/// Log to stderr and to a daily log file. The guard must be held until exit
/// so buffered lines are flushed.
fn init_tracing_with_file(log_dir: &Path) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(env_filter())
        .init();
    guard
}

#[derive(Parser, Debug)]
#[command(name = "hotel-desk")]
#[command(about = "Front desk session client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Log in (prompts for the password)
    Login {
        /// Defaults to the last username used
        username: Option<String>,
    },
    /// Log in as a guest
    Guest {
        /// Name shown for the guest session
        name: Option<String>,
    },
    /// Create an account (prompts for the password twice)
    Register { username: String, email: String },
    /// Show the stored session
    Status,
    /// Show the current user and role
    Whoami,
    /// Keep the session fresh until Ctrl-C
    Watch,
    /// End the session
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    let _log_guard = if cli.command == Command::Watch {
        let log_dir = config.data_dir()?;
        std::fs::create_dir_all(&log_dir)?;
        Some(init_tracing_with_file(&log_dir))
    } else {
        init_tracing();
        None
    };
    info!(command = ?cli.command, "Hotel Desk starting");

    let desk = commands::build_service(&config)?;

    match cli.command {
        Command::Login { username } => commands::login(&desk, &mut config, username.as_deref()).await,
        Command::Guest { name } => commands::guest(&desk, name.as_deref()).await,
        Command::Register { username, email } => commands::register(&desk, &username, &email).await,
        Command::Status => commands::status(&desk),
        Command::Whoami => commands::whoami(&desk).await,
        Command::Watch => commands::watch(&desk).await,
        Command::Logout => commands::logout(&desk).await,
    }
}
