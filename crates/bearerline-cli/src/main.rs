//! bearerline - a terminal front end for an authenticated API session.
//!
//! Signs in against the backend, keeps the session between runs, and shows
//! what the authenticated pipeline does with expired credentials.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bearerline_core::api::TransportCell;
use bearerline_core::{Config, Session, SessionOptions, StorageBackend};

#[derive(Parser)]
#[command(name = "bearerline", version, about = "Authenticated API session from the terminal")]
struct Cli {
    /// API origin, e.g. http://localhost:8000/api
    #[arg(long, env = "BEARERLINE_API_URL", global = true)]
    api_url: Option<String>,

    /// Keep the session in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Write logs to this directory in addition to stderr
    #[arg(long, env = "BEARERLINE_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(short, long, env = "BEARERLINE_USERNAME")]
        username: Option<String>,
    },
    /// Show the signed-in principal
    Whoami,
    /// GET an authenticated path and print the JSON response
    Get { path: String },
    /// Sign out of this session
    Logout {
        /// Revoke every session of this account
        #[arg(long)]
        all: bool,
    },
    /// Show whether a session is stored
    Status,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "bearerline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_ref());

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = Some(url);
    }
    if cli.ephemeral {
        config.storage = StorageBackend::Memory;
    }

    let store = config
        .credential_store()
        .context("Failed to open credential storage")?;
    let options = SessionOptions::new(store)
        .overrides(config.client_overrides())
        .reauth_path(config.reauth_path());

    let transport = TransportCell::new();
    let session = Session::start(&transport, options).context("Failed to start session")?;
    info!("bearerline starting");

    let report = !matches!(cli.command, Command::Logout { .. } | Command::Status);
    let result = match cli.command {
        Command::Login { username } => commands::login(&session, &mut config, username).await,
        Command::Whoami => commands::whoami(&session).await,
        Command::Get { path } => commands::get(&session, &path).await,
        Command::Logout { all } => commands::logout(&session, all).await,
        Command::Status => commands::status(&session),
    };

    if report {
        commands::report_reauth(&session);
    }
    result
}
