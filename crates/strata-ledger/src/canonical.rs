//! Canonical JSON encoding shared by every ledger producer.
//!
//! The form is fixed:
//! - UTF-8, no insignificant whitespace
//! - object keys sorted by byte order, recursively
//! - arrays keep their order
//! - numbers as `serde_json` renders them (decimal integers, shortest
//!   round-trip floats)
//! - strings escaped exactly as `serde_json` escapes them
//!
//! Key ordering is done here rather than relying on `serde_json::Map`, whose
//! iteration order changes when any crate in the build enables
//! `preserve_order`.

use serde::Serialize;
use serde_json::Value;

use crate::digest::Digest;
use crate::error::LedgerError;

/// Encode `value` in canonical form.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, LedgerError> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

/// BLAKE3 over the canonical encoding of `payload`.
pub fn hash_payload<T: Serialize + ?Sized>(payload: &T) -> Result<Digest, LedgerError> {
    Ok(Digest::blake3(&canonical_json(payload)?))
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), LedgerError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => serde_json::to_writer(&mut *out, s)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, item)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(item, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
