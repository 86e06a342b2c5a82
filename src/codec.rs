//! Value Codec
//!
//! The low-level cache stores opaque bytes. Loader-based entry points turn
//! typed values into bytes through a [`Codec`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encodes typed values into cache bytes and back.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON envelope via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn test_json_codec_structured_value() {
        let user = User {
            id: 7,
            name: "ada".to_string(),
        };
        let bytes = JsonCodec.encode(&user).unwrap();
        assert_eq!(bytes, br#"{"id":7,"name":"ada"}"#);
        assert_eq!(JsonCodec.decode::<User>(&bytes).unwrap(), user);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result = JsonCodec.decode::<User>(b"\x00not json");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
