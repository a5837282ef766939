use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::canonical::hash_payload;
use crate::digest::Digest;
use crate::entry::{ledger_now, validate_stream_name, EntryRef, EventType, LedgerEntry, LedgerRecord};
use crate::error::LedgerError;
use crate::index::LedgerIndex;
use crate::range::ReadRange;
use crate::store::{self, StreamWriter, STREAM_EXTENSION};
use crate::verify::{verify_lines, ChainReport};

/// Append-side state of one stream, guarded by its append lock.
struct StreamHead {
    next_sequence: u64,
    last_hash: Digest,
    writer: StreamWriter,
}

struct StreamSlot {
    path: PathBuf,
    head: Mutex<StreamHead>,
    /// Bytes of the stream file that are fully committed. Readers bound
    /// themselves by this, so they never see an append in progress.
    committed_len: AtomicU64,
}

/// Durable, append-only, hash-chained event log organized into named streams.
///
/// Layout: `<dir>/<stream>.jsonl` per stream plus a derived `<dir>/index.json`.
pub struct Ledger {
    dir: PathBuf,
    streams: RwLock<BTreeMap<String, Arc<StreamSlot>>>,
    index: RwLock<LedgerIndex>,
}

impl Ledger {
    /// Open (creating if needed) the ledger rooted at `dir`.
    ///
    /// Torn trailing records are dropped. The index is rebuilt by replay
    /// when it is missing or disagrees with the stream heads.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut slots = BTreeMap::new();
        let mut heads = BTreeMap::new();
        for stream in discover_streams(&dir)? {
            let path = store::stream_path(&dir, &stream);
            let scan = store::scan(&path, None)?;
            store::truncate_torn_tail(&path, &scan)?;
            let (next_sequence, last_hash) = scan.head();
            heads.insert(stream.clone(), next_sequence);
            slots.insert(
                stream,
                Arc::new(StreamSlot {
                    head: Mutex::new(StreamHead {
                        next_sequence,
                        last_hash,
                        writer: StreamWriter::new(path.clone()),
                    }),
                    path,
                    committed_len: AtomicU64::new(scan.committed_len),
                }),
            );
        }

        let ledger = Self {
            dir,
            streams: RwLock::new(slots),
            index: RwLock::new(LedgerIndex::new()),
        };

        match LedgerIndex::load(&ledger.dir) {
            Some(index) if index.matches_heads(&heads) => {
                *ledger.index.write() = index;
            }
            Some(_) => {
                warn!(dir = %ledger.dir.display(), "Ledger index is stale; rebuilding from streams");
                ledger.rebuild_index()?;
            }
            None => {
                ledger.rebuild_index()?;
            }
        }

        info!(
            dir = %ledger.dir.display(),
            streams = heads.len(),
            "Ledger opened"
        );
        Ok(ledger)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one event. Serialized per stream; other streams proceed in
    /// parallel.
    pub async fn append<P: Serialize + ?Sized>(
        &self,
        stream: &str,
        event_type: EventType,
        payload: &P,
    ) -> Result<LedgerEntry, LedgerError> {
        validate_stream_name(stream)?;
        let payload = serde_json::to_value(payload)?;
        let payload_hash = hash_payload(&payload)?;
        let slot = self.slot(stream);

        let mut head = slot.head.lock().await;
        let timestamp = ledger_now();
        let sequence_number = head.next_sequence;
        let entry_hash = LedgerEntry::compute_hash(
            &head.last_hash,
            sequence_number,
            &timestamp,
            stream,
            event_type,
            &payload_hash,
        )?;
        let entry = LedgerEntry {
            sequence_number,
            timestamp,
            stream: stream.to_string(),
            event_type,
            payload_hash,
            prev_entry_hash: head.last_hash,
            entry_hash,
        };

        let record = LedgerRecord {
            entry: entry.clone(),
            payload,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let committed = slot.committed_len.load(Ordering::SeqCst);
        head.writer.append_line(&line, committed)?;
        head.next_sequence += 1;
        head.last_hash = entry_hash;
        slot.committed_len
            .store(committed + line.len() as u64, Ordering::SeqCst);

        // The entry is committed. Index persistence failures are healed on
        // the next open by the watermark check.
        {
            let mut index = self.index.write();
            index.record(&entry, &record.payload);
            if let Err(e) = index.persist(&self.dir) {
                warn!(error = %e, "Failed to persist ledger index; it will be rebuilt on next open");
            }
        }
        drop(head);

        debug!(
            stream = stream,
            sequence = sequence_number,
            event_type = %event_type,
            "Ledger entry appended"
        );
        Ok(entry)
    }

    /// Replay `stream` from entry 0 and report every divergence.
    pub fn verify_chain(&self, stream: &str) -> Result<ChainReport, LedgerError> {
        validate_stream_name(stream)?;
        let Some(slot) = self.existing_slot(stream) else {
            return Ok(ChainReport {
                stream: stream.to_string(),
                valid: true,
                entries_checked: 0,
                issues: Vec::new(),
            });
        };
        let limit = slot.committed_len.load(Ordering::SeqCst);
        let scan = store::scan(&slot.path, Some(limit))?;
        let report = verify_lines(stream, &scan.lines)?;
        if !report.valid {
            warn!(
                stream = stream,
                issues = report.issues.len(),
                first = ?report.first_divergence(),
                "Chain verification found divergences"
            );
        }
        Ok(report)
    }

    /// Verify every known stream.
    pub fn verify_all(&self) -> Result<BTreeMap<String, ChainReport>, LedgerError> {
        self.streams()
            .into_iter()
            .map(|s| self.verify_chain(&s).map(|r| (s, r)))
            .collect()
    }

    /// Entries of `stream` with `from <= sequence_number <= to`.
    pub fn read_range(&self, stream: &str, from: u64, to: u64) -> Result<ReadRange, LedgerError> {
        validate_stream_name(stream)?;
        if from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let (path, limit) = match self.existing_slot(stream) {
            Some(slot) => (slot.path.clone(), slot.committed_len.load(Ordering::SeqCst)),
            None => (store::stream_path(&self.dir, stream), 0),
        };
        Ok(ReadRange::new(path, stream.to_string(), from, to, limit))
    }

    /// Every position that mentions `artifact_id`, across streams.
    pub fn index_lookup(&self, artifact_id: &str) -> Vec<EntryRef> {
        self.index.read().lookup(artifact_id)
    }

    /// Recompute the index by replaying every stream, then persist it.
    pub fn rebuild_index(&self) -> Result<(), LedgerError> {
        let mut rebuilt = LedgerIndex::new();
        let slots: Vec<Arc<StreamSlot>> = self.streams.read().values().cloned().collect();
        for slot in slots {
            let limit = slot.committed_len.load(Ordering::SeqCst);
            let scan = store::scan(&slot.path, Some(limit))?;
            for line in &scan.lines {
                if let Ok(record) = &line.record {
                    rebuilt.record(&record.entry, &record.payload);
                }
            }
        }
        rebuilt.persist(&self.dir)?;
        let artifacts = rebuilt.artifact_count();
        *self.index.write() = rebuilt;
        info!(artifacts = artifacts, "Ledger index rebuilt from streams");
        Ok(())
    }

    /// Names of all streams that have been written or opened.
    pub fn streams(&self) -> Vec<String> {
        self.streams.read().keys().cloned().collect()
    }

    /// Next sequence number of `stream` (0 when empty).
    pub async fn next_sequence(&self, stream: &str) -> u64 {
        match self.existing_slot(stream) {
            Some(slot) => slot.head.lock().await.next_sequence,
            None => 0,
        }
    }

    /// Persist the derived index. Called at session teardown.
    pub fn flush(&self) -> Result<(), LedgerError> {
        self.index.read().persist(&self.dir)
    }

    fn existing_slot(&self, stream: &str) -> Option<Arc<StreamSlot>> {
        self.streams.read().get(stream).cloned()
    }

    fn slot(&self, stream: &str) -> Arc<StreamSlot> {
        if let Some(slot) = self.existing_slot(stream) {
            return slot;
        }
        let mut streams = self.streams.write();
        streams
            .entry(stream.to_string())
            .or_insert_with(|| {
                let path = store::stream_path(&self.dir, stream);
                Arc::new(StreamSlot {
                    head: Mutex::new(StreamHead {
                        next_sequence: 0,
                        last_hash: crate::entry::GENESIS_PREV_HASH,
                        writer: StreamWriter::new(path.clone()),
                    }),
                    path,
                    committed_len: AtomicU64::new(0),
                })
            })
            .clone()
    }
}

fn discover_streams(dir: &Path) -> Result<Vec<String>, LedgerError> {
    let mut streams = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(STREAM_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if validate_stream_name(stem).is_ok() {
            streams.push(stem.to_string());
        } else {
            warn!(path = %path.display(), "Ignoring file with invalid stream name");
        }
    }
    streams.sort();
    Ok(streams)
}
