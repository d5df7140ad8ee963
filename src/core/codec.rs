//! Binary-safe body transport.
//!
//! The proxy stage between ingress and egress coerces request bodies to text,
//! which mangles anything that is not valid UTF-8 (and CRLF-sensitive multipart
//! boundaries). At ingress, bodies whose content type is on the configured
//! allow-list are replaced with `marker + base64(body)`; at egress, marked
//! bodies are decoded back to the original bytes before reaching the backend.
//!
//! The whole body is buffered. The marker and allow-list are deployment
//! configuration and must be identical on both ends.

use base64::prelude::*;
use tracing::{debug, warn};

use crate::config::CodecConfig;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A body carried the marker but the remainder was not valid base64.
    /// Forwarding it as text would silently corrupt the payload.
    #[error("body carries the binary-safe marker but its payload is not valid base64: {0}")]
    MalformedPayload(#[from] base64::DecodeError),
}

#[derive(Debug, Clone)]
pub struct BinarySafeCodec {
    config: CodecConfig,
}

impl BinarySafeCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Whether a body of `content_type` is rewritten by [BinarySafeCodec::encode].
    pub fn applies_to(&self, content_type: Option<&str>) -> bool {
        self.config.enabled
            && content_type
                .map(|content_type| self.config.matches_content_type(content_type))
                .unwrap_or(false)
    }

    /// Ingress side: make `raw` safe to hand to the text-oriented proxy stage.
    ///
    /// Bodies outside the allow-list pass through as text. Those are expected to
    /// be UTF-8 already; any invalid sequences are replaced, which is what the
    /// proxy stage itself would do to them.
    pub fn encode(&self, raw: &[u8], content_type: Option<&str>) -> String {
        if !self.applies_to(content_type) {
            debug!("skipping binary-safe encoding for content type {content_type:?}");
            return match std::str::from_utf8(raw) {
                Ok(text) => text.to_owned(),
                Err(e) => {
                    warn!(
                        "body with content type {content_type:?} is not valid UTF-8 and is not on the binary-safe allow-list: {e}"
                    );
                    String::from_utf8_lossy(raw).into_owned()
                }
            };
        }

        if raw.is_empty() {
            debug!("empty body, skipping binary-safe encoding");
            return String::new();
        }

        let encoded = format!("{}{}", self.config.marker, BASE64_STANDARD.encode(raw));

        debug!(
            "encoded {} bytes to {} bytes (base64 with marker) for content type {content_type:?}",
            raw.len(),
            encoded.len()
        );

        encoded
    }

    /// Egress side: restore the bytes the client originally sent.
    pub fn decode(&self, wire: &str) -> Result<Vec<u8>, CodecError> {
        let Some(payload) = wire.strip_prefix(self.config.marker.as_str()) else {
            return Ok(wire.as_bytes().to_vec());
        };

        let decoded = BASE64_STANDARD.decode(payload)?;

        debug!(
            "decoded body from {} chars to {} bytes",
            wire.len(),
            decoded.len()
        );

        Ok(decoded)
    }
}

impl Default for BinarySafeCodec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const MULTIPART: &str = "multipart/form-data; boundary=----X";

    #[test]
    fn encodes_allow_listed_types_with_marker() {
        let codec = BinarySafeCodec::default();
        let wire = codec.encode(&[0xff, 0x00, 0x0d, 0x0a], Some(MULTIPART));
        assert_eq!(wire, "__EDC_B64:/wANCg==");
    }

    #[test]
    fn passes_through_other_types() {
        let codec = BinarySafeCodec::default();
        let body = r#"{"name":"meter-1"}"#;
        assert_eq!(codec.encode(body.as_bytes(), Some("application/json")), body);
        assert_eq!(codec.encode(body.as_bytes(), None), body);
        assert_eq!(codec.decode(body).unwrap(), body.as_bytes());
    }

    #[test]
    fn disabled_codec_never_encodes() {
        let codec = BinarySafeCodec::new(CodecConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(codec.encode(b"abc", Some(MULTIPART)), "abc");
        // Marked bodies already in flight are still restored.
        assert_eq!(codec.decode("__EDC_B64:YWJj").unwrap(), b"abc");
    }

    #[test]
    fn malformed_payload_after_marker_is_an_error() {
        let codec = BinarySafeCodec::default();
        let err = codec.decode("__EDC_B64:not base64!").unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload(_)));
    }

    #[test]
    fn custom_marker() {
        let codec = BinarySafeCodec::new(CodecConfig {
            marker: "#B64#".into(),
            ..Default::default()
        });
        let wire = codec.encode(b"\x89PNG", Some("application/octet-stream"));
        assert!(wire.starts_with("#B64#"));
        assert_eq!(codec.decode(&wire).unwrap(), b"\x89PNG");
    }

    proptest! {
        #[test]
        fn round_trip_law(
            body in proptest::collection::vec(any::<u8>(), 0..2048),
            content_type in prop_oneof![
                Just("multipart/form-data; boundary=abc"),
                Just("application/octet-stream"),
            ],
        ) {
            let codec = BinarySafeCodec::default();
            let wire = codec.encode(&body, Some(content_type));
            prop_assert_eq!(codec.decode(&wire).unwrap(), body);
        }

        #[test]
        fn text_outside_allow_list_is_untouched(body in "[^_]{0,256}") {
            let codec = BinarySafeCodec::default();
            let wire = codec.encode(body.as_bytes(), Some("text/plain"));
            prop_assert_eq!(&wire, &body);
            prop_assert_eq!(codec.decode(&wire).unwrap(), body.into_bytes());
        }
    }
}
