//! Serialization envelope shared by both tiers.
//!
//! Every cached value is stored as an [`Envelope`]: the encoded payload plus
//! the metadata needed to expire it and to decode it again. The envelope
//! itself is always MessagePack; the payload uses whichever [`Encoding`] was
//! configured when it was written, so changing the setting never breaks
//! entries that are already stored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Payload encoding recorded in every envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Named-field MessagePack (`rmp-serde`)
    #[default]
    MsgPack,
    /// JSON (`serde_json`)
    Json,
}

impl Encoding {
    fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, String> {
        match self {
            Encoding::MsgPack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
            Encoding::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        }
    }

    fn decode<T: DeserializeOwned>(self, payload: &[u8]) -> StoreResult<T> {
        match self {
            Encoding::MsgPack => {
                rmp_serde::from_slice(payload).map_err(|e| StoreError::Codec(e.to_string()))
            }
            Encoding::Json => {
                serde_json::from_slice(payload).map_err(|e| StoreError::Codec(e.to_string()))
            }
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::MsgPack => write!(f, "msgpack"),
            Encoding::Json => write!(f, "json"),
        }
    }
}

/// A stored cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub value_type: Encoding,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Encode `value` and wrap it, returning the bytes to store.
    pub fn seal<T: Serialize + ?Sized>(
        value: &T,
        encoding: Encoding,
        ttl: Duration,
        now_ms: u64,
    ) -> Result<Vec<u8>, String> {
        let envelope = Envelope {
            value_type: encoding,
            created_at_ms: now_ms,
            ttl_ms: ttl.as_millis() as u64,
            payload: encoding.encode(value)?,
        };
        rmp_serde::to_vec_named(&envelope).map_err(|e| e.to_string())
    }

    /// Parse stored bytes back into an envelope.
    pub fn open(bytes: &[u8]) -> StoreResult<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        self.value_type.decode(&self.payload)
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.created_at_ms.saturating_add(self.ttl_ms)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms()
    }

    /// Lifetime left at `now_ms`, or `None` once expired.
    pub fn remaining(&self, now_ms: u64) -> Option<Duration> {
        let expires = self.expires_at_ms();
        (expires > now_ms).then(|| Duration::from_millis(expires - now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        country: String,
        total: u64,
    }

    #[test]
    fn test_seal_and_open_msgpack() {
        let row = Row {
            country: "DE".into(),
            total: 42,
        };
        let bytes = Envelope::seal(&row, Encoding::MsgPack, Duration::from_secs(10), 1_000).unwrap();
        let envelope = Envelope::open(&bytes).unwrap();
        assert_eq!(envelope.value_type, Encoding::MsgPack);
        assert_eq!(envelope.expires_at_ms(), 11_000);
        assert_eq!(envelope.decode::<Row>().unwrap(), row);
    }

    #[test]
    fn test_json_payload_is_readable_as_value() {
        let row = Row {
            country: "FR".into(),
            total: 7,
        };
        let bytes = Envelope::seal(&row, Encoding::Json, Duration::from_secs(1), 0).unwrap();
        let envelope = Envelope::open(&bytes).unwrap();
        let value: serde_json::Value = envelope.decode().unwrap();
        assert_eq!(value["country"], "FR");
        assert_eq!(
            std::str::from_utf8(&envelope.payload).unwrap(),
            r#"{"country":"FR","total":7}"#
        );
    }

    #[test]
    fn test_remaining_and_expiry() {
        let bytes = Envelope::seal("v", Encoding::MsgPack, Duration::from_millis(500), 1_000).unwrap();
        let envelope = Envelope::open(&bytes).unwrap();
        assert_eq!(envelope.remaining(1_200), Some(Duration::from_millis(300)));
        assert!(!envelope.is_expired(1_499));
        assert!(envelope.is_expired(1_500));
        assert_eq!(envelope.remaining(1_500), None);
    }

    #[test]
    fn test_garbage_is_codec_error() {
        let err = Envelope::open(b"not an envelope").unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[test]
    fn test_type_mismatch_is_codec_error() {
        let bytes = Envelope::seal("text", Encoding::MsgPack, Duration::from_secs(1), 0).unwrap();
        let envelope = Envelope::open(&bytes).unwrap();
        assert!(envelope.decode::<Row>().is_err());
    }
}
