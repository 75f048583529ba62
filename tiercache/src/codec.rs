//! Byte codecs.
//!
//! Codecs turn typed values into bytes and back. The orchestrator never
//! sees bytes except when isolating results; byte-oriented tiers such as
//! [`EncodedTier`](crate::tier::EncodedTier) use a codec to speak typed
//! values on top of a [`ByteStore`](crate::tier::ByteStore).

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors produced by a codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The value could not be encoded.
    #[error("{codec} encode failed: {message}")]
    Encode {
        codec: &'static str,
        message: String,
    },

    /// The bytes could not be decoded into the requested type.
    #[error("{codec} decode failed: {message}")]
    Decode {
        codec: &'static str,
        message: String,
    },
}

/// Encodes and decodes serde values.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Encode a value into bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON via `serde_json`. Works with every serde data model, including
/// self-describing values like `serde_json::Value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// Compact binary encoding via `bincode`.
///
/// Faster and smaller than JSON, but cannot decode self-describing types
/// that rely on `deserialize_any`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            message: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            message: e.to_string(),
        })
    }
}

/// Runtime selection between the built-in codecs.
///
/// Used where the codec is a configuration value rather than a type
/// parameter, e.g. for result isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    Json,
    Bincode,
}

impl Codec for CodecKind {
    fn name(&self) -> &'static str {
        match self {
            CodecKind::Json => JsonCodec.name(),
            CodecKind::Bincode => BincodeCodec.name(),
        }
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            CodecKind::Json => JsonCodec.encode(value),
            CodecKind::Bincode => BincodeCodec.encode(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            CodecKind::Json => JsonCodec.decode(bytes),
            CodecKind::Bincode => BincodeCodec.decode(bytes),
        }
    }
}
