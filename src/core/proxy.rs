//! The proxy path between a consumer request and the backend API.
//!
//! Ingress turns the consumer's raw body into the text the transfer pipeline
//! carries ([ProxyRequest::from_consumer]); egress decorates the request and
//! restores the original bytes ([ProxyPipeline::forward]).

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Method, Request};
use tracing::{debug, warn};

use super::{
    codec::{BinarySafeCodec, CodecError},
    resource::{ProxyFlags, ResourceDescriptor},
    transport::TransportType,
    util::{source_version, SOURCE_VERSION_HEADER},
};
use crate::config::{BackendApiKeyConfig, ConnectorConfig};

pub const ASSET_ID_HEADER: &str = "X-Connector-Asset-Id";
pub const CONSUMER_ID_HEADER: &str = "X-Connector-Consumer-Id";
pub const CONTRACT_SIGNING_DATE_HEADER: &str = "X-Connector-Contract-Signing-Date";

/// Query parameter naming the agreement a request is made under. Never
/// forwarded to the backend.
pub const CONTRACT_ID_QUERY_PARAM: &str = "contractId";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("unable to build backend request: {0}")]
    InvalidRequest(String),
}

/// A consumer request bound for one resource's backend.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    base_url: String,
    path: String,
    method: String,
    transport_type: TransportType,
    proxy_flags: ProxyFlags,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    content_type: Option<String>,
    body: Option<String>,
}

impl ProxyRequest {
    pub fn for_resource(resource: &ResourceDescriptor) -> Self {
        Self {
            base_url: resource.base_url().to_string(),
            path: resource.path().to_string(),
            method: resource.method().to_string(),
            transport_type: resource.transport_type(),
            proxy_flags: resource.proxy_flags(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            content_type: None,
            body: None,
        }
    }

    /// Ingress: capture the consumer's query and body, encoding the body for
    /// binary-safe resources.
    pub fn from_consumer(
        resource: &ResourceDescriptor,
        query: Option<&str>,
        body: &[u8],
        content_type: Option<&str>,
        codec: &BinarySafeCodec,
    ) -> Result<Self, ProxyError> {
        let mut request = Self::for_resource(resource);

        if let Some(query) = query.filter(|query| !query.is_empty()) {
            request.query = serde_urlencoded::from_str(query)
                .map_err(|e| ProxyError::InvalidRequest(format!("invalid query string: {e}")))?;
        }

        request.content_type = content_type.map(String::from);
        request.body = Some(if resource.transport_type().is_binary_safe() {
            codec.encode(body, content_type)
        } else {
            String::from_utf8_lossy(body).into_owned()
        });

        Ok(request)
    }

    pub fn with_body(mut self, body: String, content_type: Option<&str>) -> Self {
        self.body = Some(body);
        self.content_type = content_type.map(String::from);
        self
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn remove_query_param(&mut self, name: &str) {
        self.query.retain(|(key, _)| key != name);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Set a header, skipping (with a warning) names or values that are not
    /// valid in HTTP.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!("dropping invalid header `{name}`"),
        }
    }

    pub fn url(&self) -> String {
        let mut url = format!("{}{}", self.base_url, self.path);
        if self.proxy_flags.forward_query_params && !self.query.is_empty() {
            if let Ok(query) = serde_urlencoded::to_string(&self.query) {
                url.push('?');
                url.push_str(&query);
            }
        }
        url
    }

    /// Egress: assemble the request sent to the backend. Binary-safe bodies
    /// are decoded back to the consumer's original bytes.
    pub fn into_backend_request(
        self,
        codec: &BinarySafeCodec,
    ) -> Result<Request<Vec<u8>>, ProxyError> {
        let url = self.url();

        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let body = match self.body {
            Some(body) if self.proxy_flags.forward_body => {
                if self.transport_type.is_binary_safe() {
                    codec.decode(&body)?
                } else {
                    body.into_bytes()
                }
            }
            _ => Vec::new(),
        };

        let mut builder = Request::builder().method(method).uri(url.as_str());

        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers);
            if let Some(content_type) = self
                .content_type
                .as_deref()
                .filter(|_| !body.is_empty())
                .and_then(|content_type| HeaderValue::from_str(content_type).ok())
            {
                headers.insert(CONTENT_TYPE, content_type);
            }
        }

        debug!("forwarding {} bytes to {url}", body.len());

        builder
            .body(body)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
    }
}

/// Hook run on every request before it is forwarded.
pub trait RequestDecorator: Send + Sync {
    fn decorate(&self, request: &mut ProxyRequest);
}

/// Stamps the producing component's name and version.
pub struct SourceVersionDecorator;

impl RequestDecorator for SourceVersionDecorator {
    fn decorate(&self, request: &mut ProxyRequest) {
        request.set_header(SOURCE_VERSION_HEADER, &source_version());
    }
}

/// Authenticates against the backend with a key read from the environment
/// at request time, so the key can be rotated without recompiling resources.
pub struct BackendApiKeyDecorator {
    header: String,
    env_var: String,
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl BackendApiKeyDecorator {
    pub fn new(config: &BackendApiKeyConfig) -> Self {
        Self::with_lookup(config, |name| std::env::var(name).ok())
    }

    pub fn with_lookup<F>(config: &BackendApiKeyConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            header: config.header.clone(),
            env_var: config.env_var.clone(),
            lookup: Box::new(lookup),
        }
    }
}

impl RequestDecorator for BackendApiKeyDecorator {
    fn decorate(&self, request: &mut ProxyRequest) {
        match (self.lookup)(&self.env_var).filter(|key| !key.is_empty()) {
            Some(key) => request.set_header(&self.header, &key),
            None => warn!(
                "backend api key variable `{}` is not set, forwarding without `{}`",
                self.env_var, self.header
            ),
        }
    }
}

/// A concluded contract agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAgreement {
    pub id: String,
    pub asset_id: String,
    pub consumer_id: String,
    pub signing_date: DateTime<Utc>,
}

/// Lookup of concluded agreements, provided by the host runtime.
pub trait AgreementStore: Send + Sync {
    fn find_agreement(&self, contract_id: &str) -> Option<ContractAgreement>;
}

/// Tells the backend which agreement a request is made under and removes
/// the agreement id from the forwarded query.
pub struct ContractDetailsDecorator {
    store: Arc<dyn AgreementStore>,
}

impl ContractDetailsDecorator {
    pub fn new(store: Arc<dyn AgreementStore>) -> Self {
        Self { store }
    }
}

impl RequestDecorator for ContractDetailsDecorator {
    fn decorate(&self, request: &mut ProxyRequest) {
        let Some(contract_id) = request.query_param(CONTRACT_ID_QUERY_PARAM).map(String::from)
        else {
            return;
        };
        request.remove_query_param(CONTRACT_ID_QUERY_PARAM);

        let Some(agreement) = self.store.find_agreement(&contract_id) else {
            warn!("no agreement found for contract {contract_id}");
            return;
        };

        request.set_header(ASSET_ID_HEADER, &agreement.asset_id);
        request.set_header(CONSUMER_ID_HEADER, &agreement.consumer_id);
        request.set_header(
            CONTRACT_SIGNING_DATE_HEADER,
            &agreement
                .signing_date
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
}

/// Decorators plus the egress side of the codec.
pub struct ProxyPipeline {
    decorators: Vec<Box<dyn RequestDecorator>>,
    codec: BinarySafeCodec,
}

impl ProxyPipeline {
    pub fn new(codec: BinarySafeCodec) -> Self {
        Self {
            decorators: Vec::new(),
            codec,
        }
    }

    /// The standard decorators for `config`. Contract details are added only
    /// when the host provides an agreement store.
    pub fn from_config(
        config: &ConnectorConfig,
        agreements: Option<Arc<dyn AgreementStore>>,
    ) -> Self {
        let mut pipeline = Self::new(BinarySafeCodec::new(config.codec.clone()))
            .with_decorator(SourceVersionDecorator);

        if let Some(backend_api_key) = &config.backend_api_key {
            pipeline = pipeline.with_decorator(BackendApiKeyDecorator::new(backend_api_key));
        }

        if let Some(agreements) = agreements {
            pipeline = pipeline.with_decorator(ContractDetailsDecorator::new(agreements));
        }

        pipeline
    }

    pub fn with_decorator(mut self, decorator: impl RequestDecorator + 'static) -> Self {
        self.decorators.push(Box::new(decorator));
        self
    }

    pub fn codec(&self) -> &BinarySafeCodec {
        &self.codec
    }

    pub fn forward(&self, mut request: ProxyRequest) -> Result<Request<Vec<u8>>, ProxyError> {
        for decorator in &self.decorators {
            decorator.decorate(&mut request);
        }
        request.into_backend_request(&self.codec)
    }
}
