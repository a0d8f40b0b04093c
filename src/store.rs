//! Record store adapter.
//!
//! The orchestration core only needs `select`, `insert`, and `update`. The
//! shipped adapter keeps the table in a JSON file and replaces it with a
//! rename on every write.
use crate::record::{FieldDelta, NewWorkItem, Payload, Status, WorkItem};
use crate::util::{now_epoch_ms, write_atomic};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const STORE_SCHEMA_VERSION: u32 = 1;

pub trait RecordStore {
    /// Records whose status is in `statuses`, ordered by id.
    fn select(&self, statuses: &[Status]) -> Result<Vec<WorkItem>>;
    /// Create a record in status `new`. Filenames are unique.
    fn insert(&mut self, item: NewWorkItem) -> Result<WorkItem>;
    /// Apply `delta` to record `id` as one indivisible write.
    fn update(&mut self, id: u64, delta: &FieldDelta) -> Result<WorkItem>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordTable {
    schema_version: u32,
    next_id: u64,
    records: Vec<WorkItem>,
}

impl RecordTable {
    fn empty() -> Self {
        RecordTable {
            schema_version: STORE_SCHEMA_VERSION,
            next_id: 1,
            records: Vec::new(),
        }
    }

    fn select(&self, statuses: &[Status]) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self
            .records
            .iter()
            .filter(|item| statuses.contains(&item.status))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);
        items
    }

    fn insert(&mut self, item: NewWorkItem, now: u128) -> Result<WorkItem> {
        if item.filename.trim().is_empty() {
            return Err(anyhow!("record filename must be non-empty"));
        }
        if self
            .records
            .iter()
            .any(|existing| existing.filename == item.filename)
        {
            return Err(anyhow!("record for {} already exists", item.filename));
        }
        let record = WorkItem {
            id: self.next_id,
            filename: item.filename,
            external_id: item.external_id,
            status: Status::New,
            payload: Payload::default(),
            error_message: String::new(),
            failed_from: None,
            attempts: 0,
            created_at_epoch_ms: now,
            updated_at_epoch_ms: now,
        };
        self.next_id += 1;
        self.records.push(record.clone());
        Ok(record)
    }

    fn update(&mut self, id: u64, delta: &FieldDelta, now: u128) -> Result<WorkItem> {
        let record = self
            .records
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| anyhow!("record {id} not found"))?;
        record.apply_delta(delta, now);
        Ok(record.clone())
    }
}

/// File-backed record table.
///
/// Mutations are applied to a copy of the table, persisted, and only then
/// swapped in, so a failed write leaves both disk and memory unchanged.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    table: RecordTable,
}

impl JsonStore {
    /// Open the table at `path`. A missing file is an empty table; nothing is
    /// written until the first mutation.
    pub fn open(path: &Path) -> Result<Self> {
        let table = match fs::read(path) {
            Ok(bytes) => {
                let table: RecordTable = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parse record store {}", path.display()))?;
                if table.schema_version != STORE_SCHEMA_VERSION {
                    return Err(anyhow!(
                        "unsupported record store schema_version {}",
                        table.schema_version
                    ));
                }
                table
            }
            Err(err) if err.kind() == ErrorKind::NotFound => RecordTable::empty(),
            Err(err) => {
                return Err(err).with_context(|| format!("read record store {}", path.display()))
            }
        };
        Ok(JsonStore {
            path: path.to_path_buf(),
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&mut self, table: RecordTable) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&table).context("serialize record store")?;
        write_atomic(&self.path, &bytes)?;
        self.table = table;
        Ok(())
    }
}

impl RecordStore for JsonStore {
    fn select(&self, statuses: &[Status]) -> Result<Vec<WorkItem>> {
        Ok(self.table.select(statuses))
    }

    fn insert(&mut self, item: NewWorkItem) -> Result<WorkItem> {
        let mut table = self.table.clone();
        let record = table.insert(item, now_epoch_ms()?)?;
        self.commit(table)?;
        Ok(record)
    }

    fn update(&mut self, id: u64, delta: &FieldDelta) -> Result<WorkItem> {
        let mut table = self.table.clone();
        let record = table.update(id, delta, now_epoch_ms()?)?;
        self.commit(table)
            .with_context(|| format!("persist update for record {id}"))?;
        Ok(record)
    }
}
