//! JSON codec for relay frames.

use serde_json::Value;
use thiserror::Error;

use crate::frames::{ClientFrame, PublishFrame, ServerFrame, SubscribeFrame};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound text is not valid JSON.
    #[error("Malformed frame: {source}")]
    Malformed {
        /// The payload exactly as received.
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// Outbound frame could not be serialized.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProtocolError {
    /// The notice to send back to the client for this error.
    #[must_use]
    pub fn notice(&self) -> ServerFrame {
        match self {
            ProtocolError::Malformed { raw, .. } => ServerFrame::malformed(raw.clone()),
            ProtocolError::Encode(_) => ServerFrame::error("Internal error"),
        }
    }
}

/// Decode an inbound text frame.
///
/// Surrounding whitespace is ignored. Valid JSON that is not an object, or
/// has no recognised `type`, decodes to [`ClientFrame::Unknown`].
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the text is not valid JSON.
pub fn decode(raw: &str) -> Result<ClientFrame, ProtocolError> {
    let malformed = |source| ProtocolError::Malformed {
        raw: raw.to_string(),
        source,
    };

    let value: Value = serde_json::from_str(raw.trim()).map_err(malformed)?;

    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    let frame = match kind.as_deref() {
        Some("subscribe") => ClientFrame::Subscribe(
            serde_json::from_value::<SubscribeFrame>(value).map_err(malformed)?,
        ),
        Some("message") => ClientFrame::Message(
            serde_json::from_value::<PublishFrame>(value).map_err(malformed)?,
        ),
        _ => ClientFrame::Unknown(kind),
    };

    Ok(frame)
}

/// Encode an outbound frame to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(frame: &ServerFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::ValidationError;

    #[test]
    fn test_decode_subscribe() {
        let frame = decode(r#"  {"type":"subscribe","channelName":"room1"}  "#).unwrap();
        match frame {
            ClientFrame::Subscribe(sub) => assert_eq!(sub.channel_name(), Ok("room1")),
            other => panic!("Expected Subscribe, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_message() {
        let frame =
            decode(r#"{"type":"message","channelName":"","senderId":"u1"}"#).unwrap();
        match frame {
            ClientFrame::Message(publish) => assert_eq!(
                publish.validate(),
                Err(ValidationError::InvalidChannelName)
            ),
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode(r#"{"type":"typing"}"#).unwrap(),
            ClientFrame::Unknown(Some("typing".to_string()))
        );
        assert_eq!(decode(r#"{"channelName":"x"}"#).unwrap(), ClientFrame::Unknown(None));
        assert_eq!(decode("42").unwrap(), ClientFrame::Unknown(None));
        assert_eq!(decode(r#"{"type":7}"#).unwrap(), ClientFrame::Unknown(None));
    }

    #[test]
    fn test_decode_malformed_keeps_raw() {
        let raw = "not json at all ";
        match decode(raw) {
            Err(err @ ProtocolError::Malformed { .. }) => {
                assert_eq!(err.notice(), ServerFrame::malformed(raw));
            }
            other => panic!("Expected Malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_error_without_raw() {
        let text = encode(&ServerFrame::unknown_type()).unwrap();
        assert_eq!(text, r#"{"type":"error","message":"Unknown message type"}"#);
    }
}
