//! Diagnostic logging.
//!
//! Lines are emitted only in development or debug mode. With diagnostics on,
//! `RUST_LOG` replaces the verbose filter; with them off it is ignored.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter used when the config enables diagnostics.
const VERBOSE_FILTER: &str = "sw=debug,offcache=debug";

/// Default filter directive for the given mode.
pub fn default_filter(enabled: bool) -> &'static str {
  if enabled {
    VERBOSE_FILTER
  } else {
    "off"
  }
}

/// Filter for the given mode, honouring `RUST_LOG` only when enabled.
fn filter(enabled: bool) -> EnvFilter {
  if enabled {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(VERBOSE_FILTER))
  } else {
    EnvFilter::new(default_filter(false))
  }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the life of
/// the process.
pub fn init(enabled: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = filter(enabled);

  match log_file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(file);

      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok();

      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init()
        .ok();

      Ok(None)
    }
  }
}
