//! Value serialization.
//!
//! Every backend stores values as JSON text, so a value written through one
//! backend reads back the same through any other.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("value could not be serialized: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stored value could not be deserialized: {0}")]
    Decode(#[source] serde_json::Error),
}

pub fn encode<V: Serialize + ?Sized>(value: &V) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Encode)
}

pub fn decode<V: DeserializeOwned>(text: &str) -> Result<V, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        age: Option<u8>,
    }

    #[test]
    fn structured_values_survive_encoding() {
        let profile = Profile {
            name: "ada".into(),
            tags: vec!["admin".into(), "ops".into()],
            age: None,
        };
        let text = encode(&profile).unwrap();
        assert_eq!(text, r#"{"name":"ada","tags":["admin","ops"],"age":null}"#);
        assert_eq!(decode::<Profile>(&text).unwrap(), profile);
    }

    #[test]
    fn non_string_map_keys_fail_to_encode() {
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], "x");
        assert!(matches!(encode(&map), Err(CodecError::Encode(_))));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode::<Profile>("{not json"),
            Err(CodecError::Decode(_))
        ));
    }
}
