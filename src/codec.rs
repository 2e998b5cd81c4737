//! JSON codec for message values
//!
//! Encoding can fail (the value may have no JSON representation), decoding
//! cannot: bytes that are not valid JSON come back as a string so a consumed
//! record is never dropped because of its payload.

use serde::Serialize;
use serde_json::Value;

use crate::error::ClientResult;

/// Serialize a value to its canonical JSON bytes
pub fn encode<V>(value: &V) -> ClientResult<Vec<u8>>
where
    V: Serialize + ?Sized,
{
    Ok(serde_json::to_vec(value)?)
}

/// Decode JSON bytes, falling back to the raw (lossy UTF-8) string
pub fn decode(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
