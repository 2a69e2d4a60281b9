//! Logging setup: console output plus a daily-rotated file writer.
//!
//! Opened once at process start; the non-blocking writer guard is parked in
//! a global so file logging stays alive for the whole run.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use std::path::Path;
use std::sync::Mutex;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Initialize tracing with console + file layers.
///
/// Log level defaults to `info` and is overridable via `RUST_LOG`.
pub fn init_logging(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| anyhow!("failed to create log directory {}: {}", log_dir.display(), e))?;

    let file_appender = rolling::daily(log_dir, "harvester.log");
    let (file_writer, guard) = non_blocking(file_appender);
    LOG_GUARDS
        .lock()
        .map_err(|_| anyhow!("log guard mutex poisoned"))?
        .push(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .map_err(|e| anyhow!("failed to initialize tracing subscriber: {}", e))?;

    Ok(())
}
