//! Canonical JSON encoding.
//!
//! Signatures over links and layouts are computed on this encoding, so it has
//! to be bit-for-bit identical to what other in-toto implementations produce:
//!
//! 1. Object keys are sorted by their UTF-8 bytes.
//! 2. No whitespace between tokens.
//! 3. Strings only escape `"` and `\`; every other character is written raw.
//! 4. Numbers are integers. A float is accepted only if it is integral, and is
//!    then written without fraction or exponent.
//!
//! The encoder is always invoked on the live value right before signing or
//! verifying. Never cache its output.

use crate::error::InTotoError;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// Encode any serializable value as canonical JSON.
///
/// Values that cannot be represented as JSON at all (e.g. maps with
/// non-string keys) and non-integral numbers fail with
/// [`InTotoError::EncodingError`].
pub fn encode_canonical<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, InTotoError> {
    let value = serde_json::to_value(value)
        .map_err(|e| InTotoError::EncodingError(format!("unencodable value: {}", e)))?;
    encode_canonical_value(&value)
}

/// Encode an already materialized JSON value as canonical JSON.
pub fn encode_canonical_value(value: &Value) -> Result<Vec<u8>, InTotoError> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), InTotoError> {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Number(n) => write_number(buf, n)?,
        Value::String(s) => write_string(buf, s),
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(buf, item)?;
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            buf.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key);
                buf.push(b':');
                write_value(buf, item)?;
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

fn write_number(buf: &mut Vec<u8>, n: &serde_json::Number) -> Result<(), InTotoError> {
    if let Some(i) = n.as_i64() {
        let _ = write!(buf, "{}", i);
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        let _ = write!(buf, "{}", u);
        return Ok(());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < (i64::MAX as f64) => {
            let _ = write!(buf, "{}", f as i64);
            Ok(())
        }
        _ => Err(InTotoError::EncodingError(format!(
            "non-integral number {} cannot be canonicalized",
            n
        ))),
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}
