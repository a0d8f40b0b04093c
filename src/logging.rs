//! Process-wide log sink.
//!
//! Every component logs through `tracing`. `init` installs one subscriber
//! that writes human-readable lines to stderr and, when a log path is given,
//! appends timestamped lines to that file. The returned guard flushes the file
//! on drop.
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "RECAP_LOG";

#[must_use = "dropping the guard flushes and closes the log file"]
pub struct LogGuard {
    file: Option<Arc<File>>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = (&*file).flush();
            let _ = file.sync_data();
        }
    }
}

pub fn init(log_path: Option<&Path>) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let file = match log_path {
        Some(path) => Some(Arc::new(open_log_file(path)?)),
        None => None,
    };
    let file_layer = file.clone().map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(file)
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init()
        .context("install log subscriber")?;
    Ok(LogGuard { file })
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}
