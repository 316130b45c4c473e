//! Serializer contract
//!
//! A serializer turns a format-neutral document (`serde_json::Value`) into a
//! payload and back. Type-directed decoding into a concrete module type is not
//! the serializer's job: it happens through the decode function captured when
//! the module was registered.

use serde_json::Value;
use thiserror::Error;

/// Errors produced while encoding or decoding module state
#[derive(Error, Debug)]
pub enum SerializerError {
    /// Module state could not be turned into a document or payload
    #[error("Encode error: {0}")]
    Encode(String),

    /// Payload could not be parsed into a document
    #[error("Decode error: {0}")]
    Decode(String),

    /// Document does not describe an instance of the expected module type
    #[error("Payload is not a valid {expected}: {message}")]
    TypeMismatch {
        /// Rust type name of the registered module
        expected: &'static str,
        /// Reason reported by serde
        message: String,
    },
}

/// Payload codec used by the orchestrator
///
/// Implementations must be deterministic enough that a module survives
/// `deserialize(serialize(doc))` with equal field values.
pub trait Serializer: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Encode a document into a payload
    fn serialize(&self, document: &Value) -> Result<Vec<u8>, SerializerError>;

    /// Decode a payload back into a document
    fn deserialize(&self, payload: &[u8]) -> Result<Value, SerializerError>;
}

/// JSON payload codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Compact single-line JSON
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Indented, human-readable JSON
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        if self.pretty {
            "json-pretty"
        } else {
            "json"
        }
    }

    fn serialize(&self, document: &Value) -> Result<Vec<u8>, SerializerError> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(document)
        } else {
            serde_json::to_vec(document)
        };
        encoded.map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Value, SerializerError> {
        serde_json::from_slice(payload).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}
