//! Connector configuration.
//!
//! A [ConnectorConfig] is assembled once at startup (from code, from a serialized
//! document, or from `CONNECTOR_*` environment variables), validated, and then
//! passed by reference to every component.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CODEC_CONTENT_TYPES: &[&str] =
    &["multipart/form-data", "application/octet-stream"];
pub const DEFAULT_CODEC_MARKER: &str = "__EDC_B64:";
pub const DEFAULT_DID_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 300;
pub const DEFAULT_DELEGATE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DELEGATE_API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("invalid url for `{key}`: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("codec marker must not be empty")]
    EmptyMarker,

    #[error("codec is enabled but no content types are configured")]
    EmptyCodecContentTypes,
}

/// A url with no trailing slash, so resource paths (which start with `/`) can be
/// appended to it verbatim.
#[derive(Deserialize, Serialize, Debug, Clone, Hash, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(url: String) -> Result<Self, Self::Error> {
        Url::parse(&url)?;
        Ok(Self(url.trim_end_matches('/').to_string()))
    }
}

impl FromStr for BaseUrl {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<BaseUrl> for String {
    fn from(value: BaseUrl) -> Self {
        value.0
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an authorization check resolves to when it cannot reach a decision
/// (no delegate configured, delegate unreachable or timed out).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    #[default]
    Open,
    Closed,
}

impl FailMode {
    pub fn allows(self) -> bool {
        matches!(self, FailMode::Open)
    }
}

impl FromStr for FailMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(ConfigError::InvalidValue {
                key: "authorization.fail_mode",
                reason: format!("expected `open` or `closed`, found `{other}`"),
            }),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CodecConfig {
    pub enabled: bool,
    pub content_types: Vec<String>,
    pub marker: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_types: DEFAULT_CODEC_CONTENT_TYPES
                .iter()
                .map(ToString::to_string)
                .collect(),
            marker: DEFAULT_CODEC_MARKER.to_string(),
        }
    }
}

impl CodecConfig {
    /// Case-insensitive prefix match, so parameters such as
    /// `; boundary=...` do not prevent a match.
    pub fn matches_content_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.content_types
            .iter()
            .map(|configured| configured.trim().to_ascii_lowercase())
            .any(|configured| !configured.is_empty() && content_type.starts_with(&configured))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub enabled: bool,
    pub implicitly_trusted_dids: Vec<String>,
    pub fail_mode: FailMode,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DelegateConfig {
    pub url: Url,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_delegate_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "default_delegate_timeout_secs")]
    pub timeout_secs: u64,
}

impl DelegateConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            api_key: None,
            api_key_header: default_delegate_api_key_header(),
            timeout_secs: DEFAULT_DELEGATE_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_delegate_api_key_header() -> String {
    DEFAULT_DELEGATE_API_KEY_HEADER.to_string()
}

fn default_delegate_timeout_secs() -> u64 {
    DEFAULT_DELEGATE_TIMEOUT_SECS
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct IdentityConfig {
    pub did_cache_ttl_secs: u64,
    pub clock_skew_secs: u64,
    /// Universal resolver endpoint. DIDs are resolved at `{resolver_url}/{did}`
    /// instead of through the native `did:web` document location.
    pub resolver_url: Option<Url>,
    /// Embedded credentials must be signed by this DID's key. Without it no
    /// presentation verifies, so credential-type constraints always deny.
    pub trust_anchor_did: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            did_cache_ttl_secs: DEFAULT_DID_CACHE_TTL_SECS,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            resolver_url: None,
            trust_anchor_did: None,
        }
    }
}

impl IdentityConfig {
    pub fn did_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.did_cache_ttl_secs)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

/// Header and environment variable used to authenticate proxied requests
/// against the backend API.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BackendApiKeyConfig {
    pub header: String,
    pub env_var: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Location of the OpenAPI document: an `http(s)` url or a filesystem path.
    pub openapi_url: Option<String>,
    /// Takes precedence over any base url found in or derived from the document.
    pub base_url: Option<BaseUrl>,
    pub slugify_lowercase: bool,
    pub continue_on_schema_error: bool,
    /// Route every operation that declares a request body through the binary-safe codec.
    pub force_binary_safe: bool,
    pub codec: CodecConfig,
    pub authorization: AuthorizationConfig,
    pub delegate: Option<DelegateConfig>,
    pub identity: IdentityConfig,
    pub backend_api_key: Option<BackendApiKeyConfig>,
}

impl ConnectorConfig {
    /// Read the configuration from `CONNECTOR_*` environment variables. Unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [ConnectorConfig::from_env] with an arbitrary settings source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut config = Self {
            openapi_url: get("CONNECTOR_OPENAPI_URL"),
            ..Default::default()
        };

        if let Some(base_url) = get("CONNECTOR_BASE_URL") {
            config.base_url = Some(base_url.parse().map_err(|source| {
                ConfigError::InvalidUrl {
                    key: "base_url",
                    source,
                }
            })?);
        }
        if let Some(v) = get("CONNECTOR_SLUGIFY_LOWERCASE") {
            config.slugify_lowercase = parse_bool("slugify_lowercase", &v)?;
        }
        if let Some(v) = get("CONNECTOR_CONTINUE_ON_SCHEMA_ERROR") {
            config.continue_on_schema_error = parse_bool("continue_on_schema_error", &v)?;
        }
        if let Some(v) = get("CONNECTOR_FORCE_BINARY_SAFE") {
            config.force_binary_safe = parse_bool("force_binary_safe", &v)?;
        }

        if let Some(v) = get("CONNECTOR_CODEC_ENABLED") {
            config.codec.enabled = parse_bool("codec.enabled", &v)?;
        }
        if let Some(v) = get("CONNECTOR_CODEC_CONTENT_TYPES") {
            config.codec.content_types = split_list(&v);
        }
        if let Some(v) = lookup("CONNECTOR_CODEC_MARKER") {
            config.codec.marker = v;
        }

        if let Some(v) = get("CONNECTOR_AUTHORIZATION_ENABLED") {
            config.authorization.enabled = parse_bool("authorization.enabled", &v)?;
        }
        if let Some(v) = get("CONNECTOR_TRUSTED_DIDS") {
            config.authorization.implicitly_trusted_dids = split_list(&v);
        }
        if let Some(v) = get("CONNECTOR_AUTHORIZATION_FAIL_MODE") {
            config.authorization.fail_mode = v.parse()?;
        }

        if let Some(url) = get("CONNECTOR_PDP_URL") {
            let url = Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
                key: "delegate.url",
                source,
            })?;
            let mut delegate = DelegateConfig::new(url);
            delegate.api_key = get("CONNECTOR_PDP_API_KEY");
            if let Some(header) = get("CONNECTOR_PDP_API_KEY_HEADER") {
                delegate.api_key_header = header;
            }
            if let Some(v) = get("CONNECTOR_PDP_TIMEOUT_SECS") {
                delegate.timeout_secs = parse_u64("delegate.timeout_secs", &v)?;
            }
            config.delegate = Some(delegate);
        } else if get("CONNECTOR_PDP_API_KEY").is_some() {
            return Err(ConfigError::InvalidValue {
                key: "delegate.api_key",
                reason: "an api key was provided without CONNECTOR_PDP_URL".into(),
            });
        }

        if let Some(v) = get("CONNECTOR_DID_CACHE_TTL_SECS") {
            config.identity.did_cache_ttl_secs = parse_u64("identity.did_cache_ttl_secs", &v)?;
        }
        if let Some(v) = get("CONNECTOR_CLOCK_SKEW_SECS") {
            config.identity.clock_skew_secs = parse_u64("identity.clock_skew_secs", &v)?;
        }
        if let Some(url) = get("CONNECTOR_UNIRESOLVER_URL") {
            config.identity.resolver_url =
                Some(Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
                    key: "identity.resolver_url",
                    source,
                })?);
        }
        config.identity.trust_anchor_did = get("CONNECTOR_TRUST_ANCHOR_DID");

        if let (Some(header), Some(env_var)) = (
            get("CONNECTOR_BACKEND_API_KEY_HEADER"),
            get("CONNECTOR_BACKEND_API_KEY_ENV"),
        ) {
            config.backend_api_key = Some(BackendApiKeyConfig { header, env_var });
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.codec.marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }

        if self.codec.enabled
            && self
                .codec
                .content_types
                .iter()
                .all(|content_type| content_type.trim().is_empty())
        {
            return Err(ConfigError::EmptyCodecContentTypes);
        }

        if let Some(anchor) = &self.identity.trust_anchor_did {
            if !anchor.starts_with(crate::core::identity::did::DID_WEB_PREFIX) {
                return Err(ConfigError::InvalidValue {
                    key: "identity.trust_anchor_did",
                    reason: format!("`{anchor}` is not a did:web identifier"),
                });
            }
        }

        if let Some(delegate) = &self.delegate {
            if delegate.timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "delegate.timeout_secs",
                    reason: "must be greater than zero".into(),
                });
            }
        }

        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key,
            reason: format!("expected a boolean, found `{other}`"),
        }),
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ConnectorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.codec.marker, "__EDC_B64:");
        assert!(config.codec.enabled);
        assert_eq!(
            config.codec.content_types,
            vec!["multipart/form-data", "application/octet-stream"]
        );
        assert_eq!(config.identity.did_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.authorization.fail_mode, FailMode::Open);
        assert!(config.delegate.is_none());
    }

    #[test]
    fn reads_lists_and_delegate() {
        let config = ConnectorConfig::from_lookup(lookup(&[
            ("CONNECTOR_TRUSTED_DIDS", "did:web:a.example, did:web:b.example,"),
            ("CONNECTOR_AUTHORIZATION_ENABLED", "true"),
            ("CONNECTOR_PDP_URL", "http://pdp.local/decide"),
            ("CONNECTOR_PDP_API_KEY", "secret"),
            ("CONNECTOR_AUTHORIZATION_FAIL_MODE", "closed"),
            ("CONNECTOR_BASE_URL", "http://backend:8080/"),
        ]))
        .unwrap();

        assert_eq!(
            config.authorization.implicitly_trusted_dids,
            vec!["did:web:a.example", "did:web:b.example"]
        );
        assert!(config.authorization.enabled);
        assert_eq!(config.authorization.fail_mode, FailMode::Closed);
        let delegate = config.delegate.unwrap();
        assert_eq!(delegate.api_key.as_deref(), Some("secret"));
        assert_eq!(delegate.timeout(), Duration::from_secs(10));
        assert_eq!(config.base_url.unwrap().as_str(), "http://backend:8080");
    }

    #[test]
    fn rejects_api_key_without_delegate() {
        let err = ConnectorConfig::from_lookup(lookup(&[("CONNECTOR_PDP_API_KEY", "k")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_empty_marker() {
        let err = ConnectorConfig::from_lookup(lookup(&[("CONNECTOR_CODEC_MARKER", "")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyMarker));
    }

    #[test]
    fn trust_anchor_must_be_did_web() {
        let config = ConnectorConfig::from_lookup(lookup(&[(
            "CONNECTOR_TRUST_ANCHOR_DID",
            "did:web:anchor.example",
        )]))
        .unwrap();
        assert_eq!(
            config.identity.trust_anchor_did.as_deref(),
            Some("did:web:anchor.example")
        );

        let err = ConnectorConfig::from_lookup(lookup(&[(
            "CONNECTOR_TRUST_ANCHOR_DID",
            "did:key:z6Mk",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "identity.trust_anchor_did",
                ..
            }
        ));
    }

    #[test]
    fn content_type_prefix_match_is_case_insensitive() {
        let codec = CodecConfig::default();
        assert!(codec.matches_content_type("Multipart/Form-Data; boundary=abc"));
        assert!(codec.matches_content_type("application/octet-stream"));
        assert!(!codec.matches_content_type("application/json"));
    }

    #[test]
    fn deserializes_partial_document() {
        let config: ConnectorConfig = serde_json::from_value(serde_json::json!({
            "base_url": "http://api.local:9000",
            "authorization": { "enabled": true },
            "delegate": { "url": "http://pdp.local" }
        }))
        .unwrap();
        assert!(config.authorization.enabled);
        assert_eq!(config.codec, CodecConfig::default());
        assert_eq!(
            config.delegate.unwrap().api_key_header,
            DEFAULT_DELEGATE_API_KEY_HEADER
        );
    }
}
