//! Derived lineage index: artifact id → entry positions.
//!
//! Never authoritative. Every field here can be recomputed by replaying the
//! streams, and it is whenever the stored watermarks disagree with the
//! stream heads.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::entry::{EntryRef, LedgerEntry};
use crate::error::LedgerError;

pub(crate) const INDEX_FILE: &str = "index.json";

/// Payload fields that name an artifact.
const ARTIFACT_FIELDS: [&str; 3] = ["package_id", "artifact_id", "receipt_id"];
/// Payload field holding a list of artifact ids.
const ARTIFACT_LIST_FIELD: &str = "artifacts";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerIndex {
    artifacts: BTreeMap<String, BTreeSet<EntryRef>>,
    /// Next sequence number expected per stream at the time of the last update.
    watermarks: BTreeMap<String, u64>,
}

impl LedgerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one committed entry.
    pub fn record(&mut self, entry: &LedgerEntry, payload: &Value) {
        for artifact in artifact_ids(payload) {
            self.artifacts
                .entry(artifact)
                .or_default()
                .insert(entry.position());
        }
        let mark = self.watermarks.entry(entry.stream.clone()).or_insert(0);
        *mark = (*mark).max(entry.sequence_number + 1);
    }

    /// Positions mentioning `artifact_id`, ordered by stream then sequence.
    pub fn lookup(&self, artifact_id: &str) -> Vec<EntryRef> {
        self.artifacts
            .get(artifact_id)
            .map(|refs| refs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn watermark(&self, stream: &str) -> u64 {
        self.watermarks.get(stream).copied().unwrap_or(0)
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// True when every stream head matches the recorded watermark.
    pub(crate) fn matches_heads(&self, heads: &BTreeMap<String, u64>) -> bool {
        let non_empty: BTreeMap<&String, &u64> = heads.iter().filter(|(_, n)| **n > 0).collect();
        let marks: BTreeMap<&String, &u64> = self.watermarks.iter().filter(|(_, n)| **n > 0).collect();
        non_empty == marks
    }

    /// Load a persisted index. A missing or unreadable file yields `None`;
    /// the caller rebuilds.
    pub(crate) fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(INDEX_FILE);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ledger index unreadable");
                None
            }
        }
    }

    /// Persist via write-then-rename so readers never see a partial file.
    pub(crate) fn persist(&self, dir: &Path) -> Result<(), LedgerError> {
        let path = dir.join(INDEX_FILE);
        let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Artifact ids named by a payload.
pub fn artifact_ids(payload: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    let Some(map) = payload.as_object() else {
        return ids;
    };
    for field in ARTIFACT_FIELDS {
        if let Some(Value::String(id)) = map.get(field) {
            ids.insert(id.clone());
        }
    }
    if let Some(Value::Array(items)) = map.get(ARTIFACT_LIST_FIELD) {
        ids.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)));
    }
    ids
}
