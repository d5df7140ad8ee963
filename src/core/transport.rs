use serde::{Deserialize, Serialize};

/// Content type prefixes whose payloads cannot survive the text-oriented
/// proxy stage unmodified.
pub const BINARY_CONTENT_TYPE_PREFIXES: &[&str] = &[
    "multipart/",
    "application/octet-stream",
    "application/zip",
    "application/x-zip",
    "image/",
    "audio/",
    "video/",
];

/// How a resource's request body travels through the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    /// The body is forwarded as text.
    #[default]
    Plain,
    /// The body goes through [BinarySafeCodec](crate::core::codec::BinarySafeCodec)
    /// on both sides of the proxy.
    BinarySafe,
}

impl TransportType {
    pub fn is_binary_safe(self) -> bool {
        matches!(self, TransportType::BinarySafe)
    }
}

/// Decide the transport for an operation.
///
/// `force_override` only applies when the operation actually declares a request
/// body; forcing the codec on a body-less operation would be meaningless.
pub fn classify(content_type: &str, force_override: bool, has_request_body: bool) -> TransportType {
    if force_override && has_request_body {
        return TransportType::BinarySafe;
    }

    let content_type = content_type.trim().to_ascii_lowercase();

    if BINARY_CONTENT_TYPE_PREFIXES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
    {
        TransportType::BinarySafe
    } else {
        TransportType::Plain
    }
}
