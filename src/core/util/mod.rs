use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use http::{Request, Response};

/// Generic HTTP client.
///
/// Every outbound call (OpenAPI document retrieval, DID documents, the decision
/// delegate) goes through this trait so deployments can swap the transport and
/// tests can count or script responses.
#[async_trait]
pub trait AsyncHttpClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;
}

/// Header identifying the component that produced a proxied or outbound request.
pub const SOURCE_VERSION_HEADER: &str = "X-Connector-Extension";

pub(crate) fn source_version() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub(crate) fn base_request() -> http::request::Builder {
    Request::builder().header(SOURCE_VERSION_HEADER, source_version())
}

/// Timeout applied by [ReqwestClient::new].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ReqwestClient(reqwest::Client);

impl AsRef<reqwest::Client> for ReqwestClient {
    fn as_ref(&self) -> &reqwest::Client {
        &self.0
    }
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Build a client whose requests fail once `timeout` elapses.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .context("unable to build http_client")
            .map(Self)
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let response = self
            .0
            .execute(request.try_into().context("unable to convert request")?)
            .await
            .context("http request failed")?;

        let mut builder = Response::builder()
            .status(response.status())
            .version(response.version());

        builder
            .headers_mut()
            .context("unable to set headers")?
            .extend(response.headers().clone());

        builder
            .body(
                response
                    .bytes()
                    .await
                    .context("failed to extract response body")?
                    .to_vec(),
            )
            .context("unable to construct response")
    }
}
