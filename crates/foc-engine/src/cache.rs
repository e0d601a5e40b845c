//! Persisted record of optimistically removed devices.
//!
//! When the operator queues a device for removal the hub only reflects it
//! in a later broadcast, so the console records the removal locally first
//! and keeps the record across restarts in a small JSON file. Restore pops
//! the entry for that device id, never a positional guess, so restoring
//! from the middle of the list leaves the rest intact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use foc_core::DeviceId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueCacheEntry {
    pub id: DeviceId,
    pub name: String,
    pub counter: u64,
    pub removed_at: DateTime<Utc>,
}

pub struct QueueCache {
    path: PathBuf,
    entries: Vec<QueueCacheEntry>,
}

impl QueueCache {
    /// Loads the cache from `path`. A missing file is an empty cache; a
    /// corrupt one is logged and replaced on the next write rather than
    /// failing startup.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(path = %path.display(), "discarding corrupt removal cache: {err}");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[QueueCacheEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.entries.iter().any(|entry| &entry.id == id)
    }

    /// Records a removal. A second removal of the same id refreshes the
    /// existing entry instead of duplicating it.
    pub fn mark_removed(&mut self, id: DeviceId, name: String, counter: u64) -> anyhow::Result<()> {
        self.entries.retain(|entry| entry.id != id);
        self.entries.push(QueueCacheEntry {
            id,
            name,
            counter,
            removed_at: Utc::now(),
        });
        self.persist()
    }

    /// Removes and returns the entry for `id`, if present. The remaining
    /// entries are untouched regardless of position.
    pub fn restore(&mut self, id: &DeviceId) -> anyhow::Result<Option<QueueCacheEntry>> {
        let Some(index) = self.entries.iter().position(|entry| &entry.id == id) else {
            debug!(device = %id, "no removal record to restore");
            return Ok(None);
        };
        let entry = self.entries.remove(index);
        self.persist()?;
        Ok(Some(entry))
    }

    fn persist(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}
