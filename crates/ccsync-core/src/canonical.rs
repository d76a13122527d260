//! Canonical CBOR encoding of operation lists.
//!
//! Fingerprints are computed over these bytes, so the encoding must be
//! deterministic:
//! - Map keys are small integers, sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! Wire frames use plain serde CBOR; only hashing goes through this module.

use ciborium::value::Value;

use crate::error::CoreError;
use crate::operation::SyncOperation;

/// Operation field keys (integer keys for compact encoding).
mod keys {
    pub const TAG: u64 = 0;
    pub const KIND: u64 = 1;
    pub const PATH: u64 = 2;
    pub const DATA: u64 = 3;
    pub const PATHS: u64 = 4;
}

/// Operation discriminants.
mod tags {
    pub const CONTENT: u64 = 0;
    pub const CHUNK: u64 = 1;
    pub const DELETION: u64 = 2;
}

/// Encode an ordered operation list to canonical bytes.
pub fn canonical_operations_bytes(operations: &[SyncOperation]) -> Result<Vec<u8>, CoreError> {
    let value = Value::Array(operations.iter().map(operation_to_cbor_value).collect());
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &value)?;
    Ok(buf)
}

/// Encode a single operation to canonical bytes.
pub fn canonical_operation_bytes(operation: &SyncOperation) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &operation_to_cbor_value(operation))?;
    Ok(buf)
}

fn int(n: u64) -> Value {
    Value::Integer(n.into())
}

/// Convert an operation to a CBOR map with integer keys.
fn operation_to_cbor_value(operation: &SyncOperation) -> Value {
    let entries = match operation {
        SyncOperation::Content {
            kind,
            file_path,
            data,
        } => vec![
            (int(keys::TAG), int(tags::CONTENT)),
            (int(keys::KIND), int(kind.to_u8().into())),
            (int(keys::PATH), Value::Text(file_path.clone())),
            (int(keys::DATA), Value::Text(data.clone())),
        ],
        SyncOperation::Chunk { file_path, data } => vec![
            (int(keys::TAG), int(tags::CHUNK)),
            (int(keys::PATH), Value::Text(file_path.clone())),
            (int(keys::DATA), Value::Text(data.clone())),
        ],
        SyncOperation::Deletion { file_paths } => vec![
            (int(keys::TAG), int(tags::DELETION)),
            (
                int(keys::PATHS),
                Value::Array(file_paths.iter().cloned().map(Value::Text).collect()),
            ),
        ],
    };
    Value::Map(entries)
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CoreError> {
    match value {
        Value::Integer(i) => {
            let n = u64::try_from(*i).map_err(|_| {
                CoreError::EncodingError("negative integer in canonical encoding".into())
            })?;
            encode_uint(buf, 0, n);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item)?;
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        _ => {
            return Err(CoreError::EncodingError(
                "unsupported CBOR value in canonical encoding".into(),
            ))
        }
    }
    Ok(())
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map canonically (major type 5): keys sorted by encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CoreError> {
    let mut pairs: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, k)?;
        pairs.push((key_buf, v));
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ChannelKind;

    fn content(path: &str, data: &str) -> SyncOperation {
        SyncOperation::Content {
            kind: ChannelKind::Library,
            file_path: path.into(),
            data: data.into(),
        }
    }

    #[test]
    fn test_encoding_deterministic() {
        let ops = vec![content("a.lua", "x"), content("b.lua", "y")];
        assert_eq!(
            canonical_operations_bytes(&ops).unwrap(),
            canonical_operations_bytes(&ops).unwrap()
        );
    }

    #[test]
    fn test_encoding_order_sensitive() {
        let forward = vec![content("a.lua", "x"), content("b.lua", "y")];
        let reverse = vec![content("b.lua", "y"), content("a.lua", "x")];
        assert_ne!(
            canonical_operations_bytes(&forward).unwrap(),
            canonical_operations_bytes(&reverse).unwrap()
        );
    }

    #[test]
    fn test_content_and_chunk_distinct() {
        let a = content("a.lua", "x");
        let b = SyncOperation::Chunk {
            file_path: "a.lua".into(),
            data: "x".into(),
        };
        assert_ne!(
            canonical_operation_bytes(&a).unwrap(),
            canonical_operation_bytes(&b).unwrap()
        );
    }

    #[test]
    fn test_chunk_layout() {
        let op = SyncOperation::Chunk {
            file_path: "p".into(),
            data: "d".into(),
        };
        let bytes = canonical_operation_bytes(&op).unwrap();
        // map(3) {0: 1, 2: "p", 3: "d"}
        assert_eq!(bytes, vec![0xa3, 0x00, 0x01, 0x02, 0x61, b'p', 0x03, 0x61, b'd']);
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_uint(&mut buf, 3, 70_000);
        assert_eq!(buf, vec![0x7a, 0x00, 0x01, 0x11, 0x70]);
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (int(4), int(40)),
            (int(0), int(0)),
            (int(2), int(20)),
        ];
        encode_map_canonical(&mut buf, &entries).unwrap();

        assert_eq!(buf[0], 0xa3);
        assert_eq!(buf[1], 0x00);
        assert_eq!(buf[3], 0x02);
        assert_eq!(buf[5], 0x04);
    }

    #[test]
    fn test_unsupported_values_rejected() {
        let mut buf = Vec::new();
        assert!(encode_value_to(&mut buf, &Value::Bool(true)).is_err());
        assert!(encode_value_to(&mut buf, &Value::Integer((-1i64).into())).is_err());
    }
}
