use thiserror::Error;

/// Errors from ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid stream name `{0}`: expected 1-64 chars of [a-z0-9_-]")]
    InvalidStreamName(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid range: from {from} is greater than to {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("malformed record in stream `{stream}` at line {line}: {reason}")]
    MalformedRecord {
        stream: String,
        line: u64,
        reason: String,
    },
}

impl LedgerError {
    /// Stable error code for operator-facing output.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Io(_) => "IO_ERROR",
            LedgerError::Serialization(_) => "SERIALIZATION_ERROR",
            LedgerError::InvalidStreamName(_) => "INVALID_STREAM",
            LedgerError::InvalidDigest(_) => "INVALID_DIGEST",
            LedgerError::InvalidRange { .. } => "INVALID_RANGE",
            LedgerError::MalformedRecord { .. } => "MALFORMED_RECORD",
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
