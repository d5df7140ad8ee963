use std::sync::Arc;

use serde_json::Value as Json;
use serde_json_path::JsonPath;
use tracing::{debug, info, warn};

use super::{
    delegate::{DecisionDelegate, DecisionRequest},
    CredentialTypePattern, PolicyDescriptor,
};
use crate::{
    config::{AuthorizationConfig, FailMode},
    core::{
        identity::{CredentialClaimSet, CredentialVerifier, DidResolver},
        input_descriptor::CREDENTIAL_TYPE_PATH,
    },
};

/// The contract an access check is made under.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractContext {
    pub agreement_id: Option<String>,
    /// Policy document forwarded to the decision delegate. Defaults to the
    /// evaluated policy's own document.
    pub policy: Option<Json>,
}

impl ContractContext {
    pub fn for_agreement(agreement_id: impl Into<String>) -> Self {
        Self {
            agreement_id: Some(agreement_id.into()),
            policy: None,
        }
    }
}

/// Decides whether a caller satisfies a [PolicyDescriptor].
///
/// Denials are `false`, never errors; the caller learns nothing about which
/// constraint failed.
pub struct ConstraintEvaluator {
    implicitly_trusted_dids: Vec<String>,
    fail_mode: FailMode,
    delegate: Option<Arc<dyn DecisionDelegate + Send + Sync>>,
}

impl ConstraintEvaluator {
    pub fn new(
        config: &AuthorizationConfig,
        delegate: Option<Arc<dyn DecisionDelegate + Send + Sync>>,
    ) -> Self {
        Self {
            implicitly_trusted_dids: config.implicitly_trusted_dids.clone(),
            fail_mode: config.fail_mode,
            delegate,
        }
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    pub async fn evaluate(
        &self,
        policy: &PolicyDescriptor,
        claims: Option<&CredentialClaimSet>,
        context: &ContractContext,
    ) -> bool {
        if policy.is_unconditional() {
            return true;
        }

        if let Some(pattern) = policy.credential_type_pattern() {
            if !self.has_credential_type(pattern, claims) {
                debug!("{}: no credential matches `{pattern}`", policy.id());
                return false;
            }
        }

        if policy.requires_authorization() && !self.authorize(policy, claims, context).await {
            debug!("{}: caller is not authorized", policy.id());
            return false;
        }

        true
    }

    /// Verify `token` and evaluate the resulting claims.
    ///
    /// An invalid presentation is a denial. A presentation whose signer key
    /// cannot be fetched because the document service is down has no verified
    /// claims: a credential-type constraint denies, and only an
    /// authorization-only policy resolves to the configured [FailMode].
    pub async fn evaluate_token<R>(
        &self,
        verifier: &CredentialVerifier<R>,
        policy: &PolicyDescriptor,
        token: Option<&str>,
        context: &ContractContext,
    ) -> bool
    where
        R: DidResolver + Send + Sync,
    {
        if policy.is_unconditional() {
            return true;
        }

        let Some(token) = token else {
            return self.evaluate(policy, None, context).await;
        };

        match verifier.verify_presentation(token).await {
            Ok(claims) => self.evaluate(policy, Some(&claims), context).await,
            Err(e) if e.is_unavailable() => {
                if policy.credential_type_pattern().is_some() {
                    warn!("{}: unable to verify presentation ({e}), denying", policy.id());
                    return false;
                }
                warn!(
                    "{}: unable to verify presentation ({e}), resolving to fail mode {:?}",
                    policy.id(),
                    self.fail_mode
                );
                self.fail_mode.allows()
            }
            Err(e) => {
                debug!("{}: presentation rejected: {e}", policy.id());
                false
            }
        }
    }

    fn has_credential_type(
        &self,
        pattern: &CredentialTypePattern,
        claims: Option<&CredentialClaimSet>,
    ) -> bool {
        let Some(claims) = claims else {
            return false;
        };

        let type_path = match JsonPath::parse(CREDENTIAL_TYPE_PATH) {
            Ok(path) => path,
            Err(e) => {
                warn!("unable to parse `{CREDENTIAL_TYPE_PATH}`: {e}");
                return false;
            }
        };

        claims.credentials().iter().any(|credential| {
            type_path
                .query(credential.claims())
                .all()
                .into_iter()
                .flat_map(|node| match node {
                    Json::Array(types) => types.iter().collect::<Vec<_>>(),
                    other => vec![other],
                })
                .filter_map(Json::as_str)
                .any(|credential_type| pattern.matches(credential_type))
        })
    }

    /// Implicit trust first, then the delegate, then the fail mode.
    async fn authorize(
        &self,
        policy: &PolicyDescriptor,
        claims: Option<&CredentialClaimSet>,
        context: &ContractContext,
    ) -> bool {
        let Some(claims) = claims else {
            debug!("{}: authorization requires a presentation", policy.id());
            return false;
        };

        let Some(agreement_id) = context.agreement_id.as_deref() else {
            debug!("{}: authorization requires a contract agreement", policy.id());
            return false;
        };

        let holder = claims.holder();
        let first_subject = claims
            .credentials()
            .first()
            .and_then(|credential| credential.subject());

        if first_subject == Some(holder)
            && self
                .implicitly_trusted_dids
                .iter()
                .any(|trusted| trusted == holder)
        {
            info!("{holder} is implicitly trusted");
            return true;
        }

        let Some(delegate) = &self.delegate else {
            warn!(
                "no decision delegate configured, authorization of {holder} for agreement {agreement_id} resolves to fail mode {:?}",
                self.fail_mode
            );
            return self.fail_mode.allows();
        };

        let request = DecisionRequest {
            policy: context
                .policy
                .clone()
                .unwrap_or_else(|| policy.to_policy_document()),
            agreement_id: agreement_id.to_string(),
            presentation: claims.to_presentation_json(),
        };

        match delegate.decide(&request).await {
            Ok(decision) => {
                debug!("decision delegate answered {decision} for {holder}");
                decision
            }
            Err(e) => {
                warn!(
                    "decision delegate failed for {holder}: {e}, resolving to fail mode {:?}",
                    self.fail_mode
                );
                self.fail_mode.allows()
            }
        }
    }
}
