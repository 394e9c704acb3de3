//! Payload codecs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const JSON_CONTENT_TYPE: &str = "application/json";
const BITCODE_CONTENT_TYPE: &str = "application/x-bitcode";

/// Error type for payload encoding and decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON encode/decode failed.
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
    /// Bitcode encode/decode failed.
    #[error("bitcode codec: {0}")]
    Bitcode(#[from] bitcode::Error),
    /// The envelope names a content type no codec understands.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// Serialization format for message payloads.
///
/// The sender stamps the content type on every envelope, so a receiver
/// decodes with whatever codec the sender used regardless of its own default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// `serde_json`.
    #[default]
    Json,
    /// Compact binary via `bitcode`.
    Bitcode,
}

impl Codec {
    /// Content type stamped on envelopes encoded with this codec.
    pub fn content_type(self) -> &'static str {
        match self {
            Codec::Json => JSON_CONTENT_TYPE,
            Codec::Bitcode => BITCODE_CONTENT_TYPE,
        }
    }

    /// Resolve a codec from an envelope content type.
    pub fn from_content_type(content_type: &str) -> Result<Self, CodecError> {
        match content_type {
            JSON_CONTENT_TYPE => Ok(Codec::Json),
            BITCODE_CONTENT_TYPE => Ok(Codec::Bitcode),
            other => Err(CodecError::UnsupportedContentType(other.to_string())),
        }
    }

    /// Serialize a value.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(value)?),
            Codec::Bitcode => Ok(bitcode::serialize(value)?),
        }
    }

    /// Deserialize a value.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Codec::Json => Ok(serde_json::from_slice(bytes)?),
            Codec::Bitcode => Ok(bitcode::deserialize(bytes)?),
        }
    }
}
