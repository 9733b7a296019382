//! Subcommands run against an initialized cache

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Subcommand;
use file_blob_cache::{BlobCache, CacheFileInfo};
use serde::Serialize;
use tracing::info;

use crate::error::Result;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the size counter, entry count and limits
    Stats,

    /// List entries, least recently accessed first
    List,

    /// Copy a local file into the cache under KEY
    Put { key: String, file: PathBuf },

    /// Stream a cached entry to stdout or to a file
    Get {
        key: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Remove one entry (waits for readers of it to finish)
    Del { key: String },

    /// Remove every entry and zero the size counter
    Clear,

    /// Evict old entries if the cache is over its maximum size
    Purge,

    /// Rebuild the size counter from the directory contents
    Reconcile,

    /// Print the cache key derived from the given parts
    Key {
        #[arg(required = true)]
        parts: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct Listing<'a> {
    entries: &'a [CacheFileInfo],
}

/// Run a command that needs the cache
pub fn run(cache: &BlobCache, command: Command, json: bool, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Stats => {
            let stats = cache.stats()?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
            } else {
                writeln!(out, "directory:  {}", cache.cache_dir().display())?;
                writeln!(out, "entries:    {}", stats.entries)?;
                writeln!(out, "total size: {} bytes", stats.total_size)?;
                writeln!(out, "max size:   {}", limit(stats.max_size))?;
                writeln!(out, "purge size: {}", limit(stats.purge_size))?;
            }
        }
        Command::List => {
            let entries = cache.entries()?;
            if json {
                let listing = Listing { entries: &entries };
                writeln!(out, "{}", serde_json::to_string_pretty(&listing)?)?;
            } else {
                for entry in &entries {
                    writeln!(
                        out,
                        "{}\t{}\t{}",
                        entry.accessed_at.to_rfc3339(),
                        entry.size,
                        entry.key
                    )?;
                }
            }
        }
        Command::Put { key, file } => {
            let size = cache.try_put(&key, &file)?;
            info!(key = %key, size, "Stored");
        }
        Command::Get { key, output } => {
            let mut item = cache.try_get(&key)?;
            let copied = match output {
                Some(path) => io::copy(&mut item, &mut File::create(path)?)?,
                None => io::copy(&mut item, out)?,
            };
            info!(key = %key, bytes = copied, "Read");
        }
        Command::Del { key } => {
            let size = cache.try_del(&key)?;
            info!(key = %key, size, "Deleted");
        }
        Command::Clear => {
            let removed = cache.try_clear()?;
            writeln!(out, "removed {removed} entries")?;
        }
        Command::Purge => {
            let report = cache.try_purge()?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
            } else {
                writeln!(
                    out,
                    "removed {} entries ({} bytes), {} busy, size now {} bytes",
                    report.removed.len(),
                    report.freed(),
                    report.busy.len(),
                    report.size_after
                )?;
            }
        }
        Command::Reconcile => {
            let total = cache.reconcile()?;
            writeln!(out, "size counter set to {total} bytes")?;
        }
        Command::Key { parts } => print_key(&parts, out)?,
    }
    Ok(())
}

/// Print the derived key for `parts`
pub fn print_key(parts: &[String], out: &mut impl Write) -> Result<()> {
    writeln!(out, "{}", file_blob_cache::cache_key(parts))?;
    Ok(())
}

fn limit(bytes: u64) -> String {
    if bytes == 0 {
        "unlimited".to_string()
    } else {
        format!("{bytes} bytes")
    }
}
