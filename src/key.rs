//! Record keys.
//!
//! Keys are either text or integers. The two never collide: `"1"` and `1`
//! name different records on every backend.

use bincode::{Decode, Encode};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Encode,
    Decode,
    Serialize,
    Deserialize,
    From,
    Display,
)]
#[serde(untagged)]
pub enum RecordKey {
    #[display("{_0}")]
    Text(String),
    #[display("{_0}")]
    Integer(i64),
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Text(value.to_string())
    }
}

impl From<&String> for RecordKey {
    fn from(value: &String) -> Self {
        RecordKey::Text(value.clone())
    }
}

impl From<i32> for RecordKey {
    fn from(value: i32) -> Self {
        RecordKey::Integer(value.into())
    }
}

impl From<u32> for RecordKey {
    fn from(value: u32) -> Self {
        RecordKey::Integer(value.into())
    }
}

/// A stored record: its key and the encoded value text.
pub type EncodedRecord = (RecordKey, String);

/// Serialize a key to bytes for the byte-oriented stores.
#[cfg(any(feature = "sled", feature = "redb"))]
pub(crate) fn encode_key(key: &RecordKey) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::encode_to_vec(key, bincode::config::standard())
}

#[cfg(any(feature = "sled", feature = "redb"))]
pub(crate) fn decode_key(bytes: &[u8]) -> Result<RecordKey, bincode::error::DecodeError> {
    let (key, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(key)
}
