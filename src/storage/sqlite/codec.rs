//! Column encodings shared by the `SQLite` backends.
//!
//! - Embeddings are little-endian `f32` BLOBs.
//! - Tag sets and string lists are JSON text.
//! - Timestamps are `INTEGER` seconds; `u64` values saturate at `i64::MAX`.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes an embedding as a little-endian `f32` BLOB.
#[must_use]
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decodes a little-endian `f32` BLOB. Trailing partial values are dropped.
#[must_use]
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Converts a timestamp for storage.
#[must_use]
pub fn ts_to_sql(ts: u64) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}

/// Converts a stored timestamp back. Negative values map to 0.
#[must_use]
pub fn ts_from_sql(ts: i64) -> u64 {
    u64::try_from(ts).unwrap_or(0)
}

/// Encodes a value as JSON text.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if serialization fails.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::operation("encode_json_column", e))
}

/// Decodes JSON text, mapping failures to a `rusqlite` conversion error so
/// it can be used inside row mappers.
pub fn from_json_column<T: DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parses an enum column through its `parse` function.
pub fn parse_enum_column<T>(
    idx: usize,
    text: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value '{text}'").into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_blob() {
        let v = vec![0.25_f32, -1.0, 3.5];
        let bytes = encode_embedding(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_embedding(&bytes), v);
        assert!(decode_embedding(&bytes[..5]).len() == 1);
    }

    #[test]
    fn test_timestamp_saturation() {
        assert_eq!(ts_to_sql(u64::MAX), i64::MAX);
        assert_eq!(ts_from_sql(-5), 0);
        assert_eq!(ts_from_sql(ts_to_sql(1_700_000_000)), 1_700_000_000);
    }

    #[test]
    fn test_enum_column_error() {
        let parsed: rusqlite::Result<crate::models::AgentStatus> =
            parse_enum_column(3, "asleep", crate::models::AgentStatus::parse);
        assert!(parsed.is_err());
    }
}
