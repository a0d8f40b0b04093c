//! Read-only view of the record store and the run lock for operators.
use crate::config::Config;
use crate::lock::{LockInfo, LockManager};
use crate::record::{RetryPolicy, Status, WorkItem};
use crate::store::{JsonStore, RecordStore};
use crate::util::now_epoch_ms;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub store_path: String,
    pub total: usize,
    /// Every status appears, including those with no records.
    pub counts: BTreeMap<String, usize>,
    pub errors: Vec<ErrorEntry>,
    pub lock: LockState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub id: u64,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_from: Option<Status>,
    pub attempts: u32,
    pub parked: bool,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockState {
    pub path: String,
    pub held: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
}

pub fn build_status(config: &Config) -> Result<StatusSummary> {
    let store = JsonStore::open(&config.store_path())?;
    let records = store.select(&Status::ALL)?;
    let lock = LockManager::new(config.lock_path());
    let policy = RetryPolicy {
        max_attempts: config.max_attempts,
    };
    Ok(summarize(
        store.path().display().to_string(),
        &records,
        policy,
        lock_state(&lock, now_epoch_ms()?)?,
    ))
}

fn summarize(
    store_path: String,
    records: &[WorkItem],
    policy: RetryPolicy,
    lock: LockState,
) -> StatusSummary {
    let mut counts: BTreeMap<String, usize> = Status::ALL
        .iter()
        .map(|status| (status.as_str().to_string(), 0))
        .collect();
    for item in records {
        *counts.entry(item.status.as_str().to_string()).or_default() += 1;
    }
    let errors = records
        .iter()
        .filter(|item| item.status == Status::Error)
        .map(|item| ErrorEntry {
            id: item.id,
            filename: item.filename.clone(),
            failed_from: item.failed_from,
            attempts: item.attempts,
            parked: policy.is_parked(item),
            error_message: item.error_message.clone(),
        })
        .collect();
    StatusSummary {
        store_path,
        total: records.len(),
        counts,
        errors,
        lock,
    }
}

fn lock_state(lock: &LockManager, now_ms: u128) -> Result<LockState> {
    let path = lock.path().display().to_string();
    let state = match lock.inspect()? {
        None => LockState {
            path,
            held: false,
            pid: None,
            age_secs: None,
        },
        Some(info) => LockState {
            path,
            held: true,
            pid: info.as_ref().map(|info| info.pid),
            age_secs: info.as_ref().map(|info| age_secs(info, now_ms)),
        },
    };
    Ok(state)
}

fn age_secs(info: &LockInfo, now_ms: u128) -> u64 {
    (now_ms.saturating_sub(info.acquired_at_epoch_ms) / 1000) as u64
}

pub fn render_text(summary: &StatusSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "store: {} ({} records)", summary.store_path, summary.total);
    for status in Status::ALL {
        let count = summary.counts.get(status.as_str()).copied().unwrap_or(0);
        let _ = writeln!(out, "  {:<18} {count}", status.as_str());
    }
    if !summary.errors.is_empty() {
        let _ = writeln!(out, "errors:");
        for entry in &summary.errors {
            let origin = entry
                .failed_from
                .map(|status| status.as_str())
                .unwrap_or("unknown");
            let parked = if entry.parked { ", parked" } else { "" };
            let _ = writeln!(
                out,
                "  #{} {} (from {origin}, attempts {}{parked}): {}",
                entry.id, entry.filename, entry.attempts, entry.error_message
            );
        }
    }
    if summary.lock.held {
        let pid = summary
            .lock
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "?".to_string());
        let age = summary
            .lock
            .age_secs
            .map(|secs| format!("{secs}s"))
            .unwrap_or_else(|| "unknown age".to_string());
        let _ = writeln!(
            out,
            "lock: held by pid {pid} for {age} ({})",
            summary.lock.path
        );
    } else {
        let _ = writeln!(out, "lock: free");
    }
    out
}
