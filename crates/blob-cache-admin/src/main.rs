//! Blob cache admin - operator tool for a shared blob cache directory
//!
//! Every invocation opens its own handle on the cache, so it can run
//! alongside the servers that share the same directory.

mod commands;
mod config;
mod error;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use file_blob_cache::BlobCache;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::commands::Command;
use crate::config::AdminConfig;
use crate::error::Result;

#[derive(Debug, Parser)]
#[command(
    name = "blob-cache-admin",
    version,
    about = "Inspect and maintain a shared blob cache directory"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Cache directory (default: $BLOB_CACHE_DIR or ./cache/blobs)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Maximum cache size in bytes, 0 for unlimited (default: $BLOB_CACHE_MAX_SIZE)
    #[arg(long, global = true)]
    max_size: Option<u64>,

    /// Bytes a purge frees below the maximum (default: $BLOB_CACHE_PURGE_SIZE)
    #[arg(long, global = true)]
    purge_size: Option<u64>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_miss() => {
            warn!("{e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() -> Result<()> {
    let env_filter =
        EnvFilter::from_default_env().add_directive("blob_cache_admin=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json.
    // Logs go to stderr; stdout carries blob bytes for `get`.
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
    };
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut stdout = io::stdout().lock();

    // Key derivation needs no cache directory
    if let Command::Key { parts } = &cli.command {
        return commands::print_key(parts, &mut stdout);
    }

    let config = AdminConfig::from_env()?.with_overrides(cli.dir, cli.max_size, cli.purge_size);
    fs::create_dir_all(&config.cache_dir)?;

    let cache = BlobCache::initialize(&config.cache_dir, config.max_size, config.purge_size)?;
    info!(
        cache_dir = ?config.cache_dir,
        max_size = config.max_size,
        purge_size = config.purge_size,
        "Opened blob cache"
    );

    commands::run(&cache, cli.command, cli.json, &mut stdout)
}
