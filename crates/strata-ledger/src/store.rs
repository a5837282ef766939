//! Stream files: one newline-terminated JSON record per entry.
//!
//! A record is committed once its terminating newline is on disk. Bytes after
//! the last newline are a torn append and are never surfaced to readers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::digest::Digest;
use crate::entry::{LedgerRecord, GENESIS_PREV_HASH};
use crate::error::LedgerError;

pub(crate) const STREAM_EXTENSION: &str = "jsonl";

pub(crate) fn stream_path(dir: &Path, stream: &str) -> PathBuf {
    dir.join(format!("{stream}.{STREAM_EXTENSION}"))
}

/// One committed line, parsed or not.
pub(crate) struct ScannedLine {
    pub line: u64,
    pub record: Result<LedgerRecord, String>,
}

pub(crate) struct StreamScan {
    pub lines: Vec<ScannedLine>,
    /// Byte length covered by committed lines.
    pub committed_len: u64,
    /// Byte length of the file as read.
    pub file_len: u64,
}

impl StreamScan {
    pub fn has_torn_tail(&self) -> bool {
        self.file_len > self.committed_len
    }

    /// Next sequence number and chain head implied by the committed lines.
    pub fn head(&self) -> (u64, Digest) {
        match self.lines.last() {
            None => (0, GENESIS_PREV_HASH),
            Some(ScannedLine {
                record: Ok(record), ..
            }) => (record.entry.sequence_number + 1, record.entry.entry_hash),
            Some(ScannedLine { line, .. }) => {
                // Unparseable tail: keep counting by position. The chain is
                // broken at this point and verification will say so.
                let prev = self
                    .lines
                    .iter()
                    .rev()
                    .find_map(|l| l.record.as_ref().ok())
                    .map(|r| r.entry.entry_hash)
                    .unwrap_or(GENESIS_PREV_HASH);
                (*line + 1, prev)
            }
        }
    }
}

/// Read the committed lines of a stream file, up to `limit` bytes.
pub(crate) fn scan(path: &Path, limit: Option<u64>) -> Result<StreamScan, LedgerError> {
    let mut buf = Vec::new();
    match File::open(path) {
        Ok(file) => match limit {
            Some(limit) => {
                file.take(limit).read_to_end(&mut buf)?;
            }
            None => {
                let mut file = file;
                file.read_to_end(&mut buf)?;
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let committed_len = buf
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|p| p as u64 + 1)
        .unwrap_or(0);

    let mut lines = Vec::new();
    for (i, raw) in buf[..committed_len as usize]
        .split(|b| *b == b'\n')
        .filter(|l| !l.is_empty())
        .enumerate()
    {
        let record = serde_json::from_slice::<LedgerRecord>(raw).map_err(|e| e.to_string());
        lines.push(ScannedLine {
            line: i as u64,
            record,
        });
    }

    Ok(StreamScan {
        lines,
        committed_len,
        file_len: buf.len() as u64,
    })
}

/// Drop an uncommitted tail left behind by an interrupted append.
pub(crate) fn truncate_torn_tail(path: &Path, scan: &StreamScan) -> Result<(), LedgerError> {
    if !scan.has_torn_tail() {
        return Ok(());
    }
    warn!(
        path = %path.display(),
        torn_bytes = scan.file_len - scan.committed_len,
        "Dropping uncommitted tail of stream file"
    );
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(scan.committed_len)?;
    file.sync_all()?;
    Ok(())
}

/// Append handle for one stream file.
pub(crate) struct StreamWriter {
    path: PathBuf,
    file: Option<File>,
}

impl StreamWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    /// Write one record line and fsync it. On failure the file is cut back to
    /// `committed_len` so a partial line never precedes the next append.
    pub fn append_line(&mut self, line: &[u8], committed_len: u64) -> Result<(), LedgerError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(LedgerError::Io(std::io::Error::other("stream file unavailable")));
        };

        let result = file.write_all(line).and_then(|_| file.sync_data());
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Append failed; rolling back partial record");
            if let Err(trunc) = file.set_len(committed_len) {
                warn!(path = %self.path.display(), error = %trunc, "Could not roll back partial record");
            }
            self.file = None;
            return Err(e.into());
        }
        Ok(())
    }
}
