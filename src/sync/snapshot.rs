//! Baseline snapshots for conflict detection.
//!
//! A snapshot records each record's properties at the last successful sync.
//! With a baseline, a pair that diverged on a field both sides changed is a
//! CONFLICT; without one, divergence is only MODIFIED.
//!
//! On disk a snapshot is JSONL, one [`SnapshotEntry`] per line.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{PropertyMap, Record, RecordId, RecordType};
use crate::sync::file::{read_jsonl, write_jsonl};
use crate::sync::hash::{content_hash, has_changed};

/// One record's properties at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: RecordId,
    pub record_type: RecordType,
    pub properties: PropertyMap,
    /// SHA256 of `properties`; entries that fail the check are dropped on load.
    pub content_hash: String,
    /// RFC 3339 timestamp.
    pub taken_at: String,
}

impl SnapshotEntry {
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        let properties = record.properties();
        Self {
            id: record.id,
            record_type: record.record_type(),
            content_hash: content_hash(&properties),
            properties,
            taken_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Baseline properties keyed by record identity.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashMap<RecordId, SnapshotEntry>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut snapshot = Self::new();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    /// Record (or replace) the baseline of one record.
    pub fn insert(&mut self, record: &Record) {
        self.entries.insert(record.id, SnapshotEntry::from_record(record));
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&PropertyMap> {
        self.entries.get(id).map(|e| &e.properties)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from `other` replace entries with the same identity.
    pub fn merge(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Load a snapshot file, skipping entries whose hash does not verify.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or a line does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let lines: Vec<SnapshotEntry> = read_jsonl(path)?;
        let mut entries = HashMap::with_capacity(lines.len());
        for entry in lines {
            if has_changed(&content_hash(&entry.properties), Some(&entry.content_hash)) {
                warn!(id = %entry.id, "Baseline entry failed its content check, ignoring it");
                continue;
            }
            entries.insert(entry.id, entry);
        }
        debug!(path = %path.display(), entries = entries.len(), "Loaded baseline");
        Ok(Self { entries })
    }

    /// Write the snapshot atomically, ordered by identity for stable diffs.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut entries: Vec<&SnapshotEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.id);
        write_jsonl(path, &entries)
    }
}
