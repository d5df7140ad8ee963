use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::{
    config::DelegateConfig,
    core::util::{base_request, AsyncHttpClient},
};

#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
    #[error("decision delegate did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("decision delegate is unavailable: {0}")]
    Unavailable(String),

    #[error("decision delegate answer is not a boolean decision: {0}")]
    InvalidResponse(String),
}

/// Body of a decision request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub policy: Json,
    pub agreement_id: String,
    pub presentation: Json,
}

/// External policy decision point consulted for callers that are not
/// implicitly trusted.
#[async_trait]
pub trait DecisionDelegate {
    async fn decide(&self, request: &DecisionRequest) -> Result<bool, DelegateError>;
}

pub struct HttpDecisionDelegate<C> {
    client: C,
    config: DelegateConfig,
}

impl<C: AsyncHttpClient + Send + Sync> HttpDecisionDelegate<C> {
    pub fn new(client: C, config: DelegateConfig) -> Self {
        Self { client, config }
    }
}

/// Accepts `true`/`false`, either bare, as text, or under one of the usual
/// decision keys of a JSON object.
fn interpret_decision(body: &[u8]) -> Result<bool, DelegateError> {
    let invalid = || DelegateError::InvalidResponse(String::from_utf8_lossy(body).into_owned());

    match serde_json::from_slice::<Json>(body) {
        Ok(Json::Bool(decision)) => Ok(decision),
        Ok(Json::Object(object)) => ["authorized", "allowed", "decision", "result"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Json::as_bool))
            .ok_or_else(invalid),
        Ok(_) => Err(invalid()),
        Err(_) => match std::str::from_utf8(body).map(str::trim) {
            Ok(text) if text.eq_ignore_ascii_case("true") => Ok(true),
            Ok(text) if text.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(invalid()),
        },
    }
}

#[async_trait]
impl<C: AsyncHttpClient + Send + Sync> DecisionDelegate for HttpDecisionDelegate<C> {
    async fn decide(&self, request: &DecisionRequest) -> Result<bool, DelegateError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| DelegateError::Unavailable(format!("unable to encode request: {e}")))?;

        let mut builder = base_request()
            .method("POST")
            .uri(self.config.url.as_str())
            .header(http::header::CONTENT_TYPE, "application/json");

        if let Some(api_key) = &self.config.api_key {
            builder = builder.header(self.config.api_key_header.as_str(), api_key.as_str());
        }

        let http_request = builder
            .body(body)
            .map_err(|e| DelegateError::Unavailable(e.to_string()))?;

        debug!(
            "requesting decision for agreement {} from {}",
            request.agreement_id, self.config.url
        );

        let timeout = self.config.timeout();
        let response = tokio::time::timeout(timeout, self.client.execute(http_request))
            .await
            .map_err(|_| DelegateError::Timeout(timeout))?
            .map_err(|e| DelegateError::Unavailable(format!("{e:#}")))?;

        if !response.status().is_success() {
            return Err(DelegateError::Unavailable(format!(
                "responded with {}",
                response.status()
            )));
        }

        interpret_decision(response.body())
    }
}
