//! Tracing setup for hosts that bring no subscriber of their own.
//!
//! A library must not clobber the embedding application's logging, so every
//! installer here goes through `try_init`: if the host already set a global
//! subscriber, installation fails with an error instead of panicking.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,recall=debug"))
}

/// Log file location under the XDG state directory
/// (`~/.local/state/recall/recall.log`).
pub fn default_log_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("recall")?;
    Ok(xdg_dirs.get_state_home().join("recall.log"))
}

/// Per-event writer: a fresh handle on the log file, or stderr when the
/// handle cannot be duplicated.
struct FileWriter(fs::File);

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = Box<dyn io::Write>;

    fn make_writer(&'a self) -> Self::Writer {
        match self.0.try_clone() {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::stderr()),
        }
    }
}

/// Install a file-backed subscriber writing to `path`, creating parent
/// directories as needed. Fails if a global subscriber is already set.
pub fn init_logging_to(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(FileWriter(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))?;

    tracing::info!("logging initialized at {}", path.display());
    Ok(())
}

/// Install the file-backed subscriber at [`default_log_path`].
pub fn init_logging() -> Result<()> {
    init_logging_to(&default_log_path()?)
}

/// Stderr-only subscriber, for hosts without a writable state directory.
pub fn init_logging_stderr() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}
