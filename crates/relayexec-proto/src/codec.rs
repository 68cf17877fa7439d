//! JSON codec for envelopes

use crate::{Envelope, ProtocolError};

/// Maximum envelope size (16MB)
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Codec turning envelopes into JSON text and back.
///
/// Framing is the transport's job; one encoded envelope is one transport
/// message.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    /// Maximum envelope size allowed
    max_size: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    /// Create a new codec with default settings
    pub fn new() -> Self {
        Self {
            max_size: MAX_ENVELOPE_SIZE,
        }
    }

    /// Create a new codec with a custom size limit
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Encode an envelope to JSON text
    pub fn encode(&self, envelope: &Envelope) -> Result<String, ProtocolError> {
        let text = serde_json::to_string(envelope)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

        if text.len() > self.max_size {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                max: self.max_size,
            });
        }

        Ok(text)
    }

    /// Decode an envelope from JSON text
    pub fn decode(&self, text: &str) -> Result<Envelope, ProtocolError> {
        self.decode_bytes(text.as_bytes())
    }

    /// Decode an envelope from raw bytes holding JSON text
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Envelope, ProtocolError> {
        if bytes.len() > self.max_size {
            return Err(ProtocolError::TooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }

        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Get the configured size limit
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandRequest, CommandResponse};
    use proptest::prelude::*;

    #[test]
    fn test_encode_decode_command() {
        let codec = EnvelopeCodec::new();
        let env = Envelope::Command(CommandRequest::new("a1", "echo hi", "r1"));

        let text = codec.encode(&env).unwrap();
        assert!(text.contains(r#""type":"command""#));

        let decoded = codec.decode(&text).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_decode_not_json() {
        let codec = EnvelopeCodec::new();
        let result = codec.decode("not json at all");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_missing_type() {
        let codec = EnvelopeCodec::new();
        let result = codec.decode(r#"{"agent_id": "a1"}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_missing_required_field() {
        let codec = EnvelopeCodec::new();
        let result = codec.decode(r#"{"type": "agent_register"}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_envelope_too_large() {
        let codec = EnvelopeCodec::with_max_size(64);
        let env = Envelope::CommandResponse(CommandResponse::new(
            Some("r1".into()),
            "a1",
            "cat big",
            "x".repeat(200),
            "/",
        ));

        assert!(matches!(codec.encode(&env), Err(ProtocolError::TooLarge { .. })));
        assert!(matches!(
            codec.decode(&"y".repeat(100)),
            Err(ProtocolError::TooLarge { size: 100, max: 64 })
        ));
    }

    proptest! {
        #[test]
        fn test_command_text_survives_codec(
            command in ".{0,200}",
            id in "[a-f0-9-]{1,36}"
        ) {
            let codec = EnvelopeCodec::new();
            let env = Envelope::Command(CommandRequest::new("agent", command.clone(), id.clone()));

            let decoded = codec.decode(&codec.encode(&env).unwrap()).unwrap();
            prop_assert_eq!(decoded.command_id(), Some(id.as_str()));
            match decoded {
                Envelope::Command(req) => prop_assert_eq!(req.command, command),
                _ => prop_assert!(false, "expected command"),
            }
        }
    }
}
