//! Single-run lock marker.
//!
//! Presence of the marker file means a run is active. Creation uses
//! `create_new`, so check-and-create is one filesystem operation and two
//! racing callers cannot both win.
//!
//! A process killed while holding the marker leaves it behind. Nothing here
//! expires it; `recap unlock` removes it by hand.
use crate::util::now_epoch_ms;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Diagnostic contents of the marker. Only the file's existence is meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at_epoch_ms: u128,
}

pub enum Acquire {
    Acquired(LockGuard),
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: PathBuf) -> Self {
        LockManager { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the marker if absent.
    ///
    /// Returns `AlreadyRunning` without touching anything when another run
    /// holds it.
    pub fn acquire(&self) -> Result<Acquire> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Ok(Acquire::AlreadyRunning)
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("create lock marker {}", self.path.display()))
            }
        };
        let guard = LockGuard {
            path: self.path.clone(),
            released: false,
        };
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at_epoch_ms: now_epoch_ms()?,
        };
        let text = serde_json::to_string(&info).context("serialize lock info")?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("write lock marker {}", self.path.display()))?;
        Ok(Acquire::Acquired(guard))
    }

    /// Remove the marker unconditionally. Removing an absent marker succeeds.
    pub fn release(&self) -> Result<()> {
        remove_marker(&self.path)
    }

    /// Read the marker, if present. Unreadable contents report as `None` info.
    pub fn inspect(&self) -> Result<Option<Option<LockInfo>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).ok())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", self.path.display())),
        }
    }
}

/// Held for the duration of a run; dropping it removes the marker.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_marker(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_marker(&self.path) {
            tracing::error!(error = %format!("{err:#}"), "failed to release run lock");
        }
    }
}

fn remove_marker(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "run lock released");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove lock marker {}", path.display())),
    }
}
