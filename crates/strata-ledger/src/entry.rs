use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::canonical_json;
use crate::digest::Digest;
use crate::error::LedgerError;

/// `prev_entry_hash` of entry 0 in every stream.
pub const GENESIS_PREV_HASH: Digest = Digest::ZERO;

/// Well-known stream names.
pub mod streams {
    pub const PACKAGE: &str = "package";
    pub const GOVERNANCE: &str = "governance";
    pub const EVIDENCE: &str = "evidence";
    pub const EXEC: &str = "exec";

    pub const ALL: [&str; 4] = [PACKAGE, GOVERNANCE, EVIDENCE, EXEC];
}

/// Kinds of events recorded in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Install,
    InstallFailed,
    Uninstall,
    CapabilityDenied,
    PristineBypass,
    Waiver,
    WaiverConflict,
    Evidence,
    Exec,
    DrillExport,
    DrillWipe,
    DrillComplete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Install => "INSTALL",
            EventType::InstallFailed => "INSTALL_FAILED",
            EventType::Uninstall => "UNINSTALL",
            EventType::CapabilityDenied => "CAPABILITY_DENIED",
            EventType::PristineBypass => "PRISTINE_BYPASS",
            EventType::Waiver => "WAIVER",
            EventType::WaiverConflict => "WAIVER_CONFLICT",
            EventType::Evidence => "EVIDENCE",
            EventType::Exec => "EXEC",
            EventType::DrillExport => "DRILL_EXPORT",
            EventType::DrillWipe => "DRILL_WIPE",
            EventType::DrillComplete => "DRILL_COMPLETE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of an entry: `(stream, sequence_number)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryRef {
    pub stream: String,
    pub sequence_number: u64,
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.stream, self.sequence_number)
    }
}

/// One committed, immutable ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub stream: String,
    pub event_type: EventType,
    pub payload_hash: Digest,
    pub prev_entry_hash: Digest,
    pub entry_hash: Digest,
}

/// The fields covered by `entry_hash`, in canonical form.
#[derive(Serialize)]
struct HashedFields<'a> {
    sequence_number: u64,
    timestamp: String,
    stream: &'a str,
    event_type: EventType,
    payload_hash: Digest,
}

impl LedgerEntry {
    /// `BLAKE3(prev ‖ canonical(sequence_number, timestamp, stream, event_type, payload_hash))`.
    pub fn compute_hash(
        prev_entry_hash: &Digest,
        sequence_number: u64,
        timestamp: &DateTime<Utc>,
        stream: &str,
        event_type: EventType,
        payload_hash: &Digest,
    ) -> Result<Digest, LedgerError> {
        let fields = canonical_json(&HashedFields {
            sequence_number,
            timestamp: canonical_timestamp(timestamp),
            stream,
            event_type,
            payload_hash: *payload_hash,
        })?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(prev_entry_hash.as_bytes());
        hasher.update(&fields);
        Ok(Digest::from_bytes(*hasher.finalize().as_bytes()))
    }

    /// Recompute this entry's hash from its stored fields.
    pub fn recompute_hash(&self) -> Result<Digest, LedgerError> {
        Self::compute_hash(
            &self.prev_entry_hash,
            self.sequence_number,
            &self.timestamp,
            &self.stream,
            self.event_type,
            &self.payload_hash,
        )
    }

    pub fn position(&self) -> EntryRef {
        EntryRef {
            stream: self.stream.clone(),
            sequence_number: self.sequence_number,
        }
    }
}

/// On-disk record: the entry plus the payload it commits to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub payload: Value,
}

/// RFC 3339, exactly six fractional digits, `Z` suffix.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the ledger stores.
pub(crate) fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Stream names are used as file names, so they are restricted.
pub fn validate_stream_name(stream: &str) -> Result<(), LedgerError> {
    let ok = !stream.is_empty()
        && stream.len() <= 64
        && stream
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(LedgerError::InvalidStreamName(stream.to_string()))
    }
}
