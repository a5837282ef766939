use serde::{Deserialize, Serialize};

use crate::canonical::hash_payload;
use crate::digest::Digest;
use crate::entry::{LedgerEntry, GENESIS_PREV_HASH};
use crate::error::LedgerError;
use crate::store::ScannedLine;

/// What diverged at a given position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Stored payload no longer hashes to `payload_hash`.
    PayloadHash,
    /// Recomputed `entry_hash` differs from the stored one.
    EntryHash,
    /// `prev_entry_hash` does not match the recomputed hash of the previous entry.
    ChainLink,
    /// Sequence number is not the next one expected.
    Sequence,
    /// The record could not be parsed at all.
    Malformed,
}

/// One divergence found during verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIssue {
    pub sequence_number: u64,
    pub kind: IssueKind,
    pub expected_hash: Option<Digest>,
    pub actual_hash: Option<Digest>,
    pub detail: String,
}

/// Result of replaying one stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub stream: String,
    pub valid: bool,
    pub entries_checked: u64,
    pub issues: Vec<ChainIssue>,
}

impl ChainReport {
    /// Sequence number of the earliest divergence.
    pub fn first_divergence(&self) -> Option<u64> {
        self.issues.iter().map(|i| i.sequence_number).min()
    }
}

/// Replay `lines` from entry 0, collecting every divergence.
pub(crate) fn verify_lines(stream: &str, lines: &[ScannedLine]) -> Result<ChainReport, LedgerError> {
    let mut issues = Vec::new();
    // Recomputed hash of the previous entry; `None` after an unparseable record.
    let mut expected_prev = Some(GENESIS_PREV_HASH);

    for (position, line) in lines.iter().enumerate() {
        let expected_seq = position as u64;
        let record = match &line.record {
            Ok(record) => record,
            Err(reason) => {
                issues.push(ChainIssue {
                    sequence_number: expected_seq,
                    kind: IssueKind::Malformed,
                    expected_hash: None,
                    actual_hash: None,
                    detail: reason.clone(),
                });
                expected_prev = None;
                continue;
            }
        };
        let entry = &record.entry;

        if entry.sequence_number != expected_seq {
            issues.push(ChainIssue {
                sequence_number: expected_seq,
                kind: IssueKind::Sequence,
                expected_hash: None,
                actual_hash: None,
                detail: format!(
                    "expected sequence {}, found {}",
                    expected_seq, entry.sequence_number
                ),
            });
        }

        if expected_prev != Some(entry.prev_entry_hash) {
            issues.push(ChainIssue {
                sequence_number: expected_seq,
                kind: IssueKind::ChainLink,
                expected_hash: expected_prev,
                actual_hash: Some(entry.prev_entry_hash),
                detail: "previous hash link mismatch".into(),
            });
        }

        let payload_hash = hash_payload(&record.payload)?;
        if payload_hash != entry.payload_hash {
            issues.push(ChainIssue {
                sequence_number: expected_seq,
                kind: IssueKind::PayloadHash,
                expected_hash: Some(payload_hash),
                actual_hash: Some(entry.payload_hash),
                detail: "payload does not match payload_hash".into(),
            });
        }

        let recomputed = LedgerEntry::compute_hash(
            &entry.prev_entry_hash,
            entry.sequence_number,
            &entry.timestamp,
            &entry.stream,
            entry.event_type,
            &payload_hash,
        )?;
        if recomputed != entry.entry_hash || entry.stream != stream {
            issues.push(ChainIssue {
                sequence_number: expected_seq,
                kind: IssueKind::EntryHash,
                expected_hash: Some(recomputed),
                actual_hash: Some(entry.entry_hash),
                detail: if entry.stream != stream {
                    format!("entry claims stream `{}`", entry.stream)
                } else {
                    "entry hash mismatch".into()
                },
            });
        }

        expected_prev = Some(recomputed);
    }

    Ok(ChainReport {
        stream: stream.to_string(),
        valid: issues.is_empty(),
        entries_checked: lines.len() as u64,
        issues,
    })
}
