//! Stream Codec
//!
//! JSON encoding and decoding for the Finnhub trade stream. Frames are
//! single JSON objects discriminated by `type`; unknown types decode to
//! [`FinnhubMessage::Other`] rather than failing.

use super::messages::{ControlMessage, ErrorFrame, FinnhubMessage, TradeFrame};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame has no `type` field.
    #[error("frame has no type field")]
    MissingType,

    /// The frame is not a JSON object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the trade stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a string
    /// `type`, or if a known frame type has an invalid body.
    pub fn decode(&self, text: &str) -> Result<FinnhubMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {preview}"
            )));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(CodecError::MissingType)?;

        match kind {
            "trade" => Ok(FinnhubMessage::Trade(serde_json::from_value::<TradeFrame>(
                value,
            )?)),
            "ping" => Ok(FinnhubMessage::Ping),
            "error" => Ok(FinnhubMessage::Error(serde_json::from_value::<ErrorFrame>(
                value,
            )?)),
            other => Ok(FinnhubMessage::Other(other.to_string())),
        }
    }

    /// Encode an outbound control frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_control(&self, message: &ControlMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}
