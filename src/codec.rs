//! JSON message codec
//!
//! Records travel as JSON objects. Encoding only fails for values serde
//! cannot represent; decoding fails on malformed or schema-mismatched input.

use crate::error::{EventError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a record into a message payload
pub fn encode<T: Serialize>(record: &T) -> Result<Bytes> {
    serde_json::to_vec(record)
        .map(Bytes::from)
        .map_err(EventError::Encode)
}

/// Deserialize a message payload into a record
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(EventError::Decode)
}
