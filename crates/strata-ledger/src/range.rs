use std::fs::File;
use std::io::{BufRead, BufReader, Read, Take};
use std::path::PathBuf;

use crate::entry::{LedgerEntry, LedgerRecord};
use crate::error::LedgerError;

/// Lazy, finite, restartable iteration over `from..=to` of one stream.
///
/// The byte limit is fixed when the range is created, so entries appended
/// afterwards, and any append still in flight, are never observed.
pub struct ReadRange {
    path: PathBuf,
    stream: String,
    from: u64,
    to: u64,
    limit: u64,
    reader: Option<BufReader<Take<File>>>,
    line: u64,
    done: bool,
}

impl ReadRange {
    pub(crate) fn new(path: PathBuf, stream: String, from: u64, to: u64, limit: u64) -> Self {
        Self {
            path,
            stream,
            from,
            to,
            limit,
            reader: None,
            line: 0,
            done: false,
        }
    }

    /// Rewind to the start of the range. The byte limit is unchanged.
    pub fn restart(&mut self) {
        self.reader = None;
        self.line = 0;
        self.done = false;
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn open(&mut self) -> Result<bool, LedgerError> {
        if self.reader.is_some() {
            return Ok(true);
        }
        match File::open(&self.path) {
            Ok(file) => {
                self.reader = Some(BufReader::new(file.take(self.limit)));
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Iterator for ReadRange {
    type Item = Result<LedgerEntry, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            match self.open() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            let reader = self.reader.as_mut()?;

            let mut buf = String::new();
            match reader.read_line(&mut buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) if !buf.ends_with('\n') => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
            let line = self.line;
            self.line += 1;
            if buf.trim().is_empty() {
                continue;
            }

            let record: LedgerRecord = match serde_json::from_str(&buf) {
                Ok(record) => record,
                Err(e) => {
                    return Some(Err(LedgerError::MalformedRecord {
                        stream: self.stream.clone(),
                        line,
                        reason: e.to_string(),
                    }))
                }
            };
            let seq = record.entry.sequence_number;
            if seq < self.from {
                continue;
            }
            if seq > self.to {
                self.done = true;
                return None;
            }
            return Some(Ok(record.entry));
        }
    }
}
