use std::time::Duration;

use base64::prelude::*;
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::did::{DidResolver, ResolutionError};
use crate::config::IdentityConfig;

#[derive(Debug, thiserror::Error)]
pub enum PresentationError {
    #[error("token is not a compact JWS: {0}")]
    Malformed(String),

    #[error("token has no `sub` claim")]
    MissingSubject,

    #[error("token has no `iss` claim")]
    MissingIssuer,

    #[error("token issuer `{issuer}` does not match its subject `{subject}`")]
    IssuerSubjectMismatch { issuer: String, subject: String },

    #[error("token has no `vp` claim")]
    MissingPresentation,

    #[error("presentation holder {holder:?} does not match the token issuer `{issuer}`")]
    HolderMismatch {
        holder: Option<String>,
        issuer: String,
    },

    #[error("presentation has no `verifiableCredential`")]
    MissingCredentials,

    #[error("embedded credential has no `vc` claim")]
    MissingCredentialClaim,

    #[error("credential subject {subject:?} does not match the presentation issuer `{issuer}`")]
    CredentialSubjectMismatch {
        subject: Option<String>,
        issuer: String,
    },

    #[error("no trust anchor is configured to verify embedded credentials")]
    NoTrustAnchor,

    #[error("token expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("signature could not be verified: {0}")]
    InvalidSignature(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl PresentationError {
    /// The signer's key could not be obtained because the document service was
    /// unreachable, as opposed to the presentation itself being invalid.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            PresentationError::Resolution(
                ResolutionError::Timeout { .. } | ResolutionError::Unavailable { .. }
            )
        )
    }
}

/// A credential taken from a verified presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCredential {
    issuer: Option<String>,
    subject: Option<String>,
    claims: Json,
}

impl VerifiedCredential {
    /// Build from a decoded `vc` object.
    pub fn from_claims(claims: Json) -> Self {
        let issuer = match claims.get("issuer") {
            Some(Json::String(issuer)) => Some(issuer.clone()),
            Some(Json::Object(issuer)) => issuer.get("id").and_then(Json::as_str).map(String::from),
            _ => None,
        };
        let subject = credential_subject_id(&claims).map(String::from);

        Self {
            issuer,
            subject,
            claims,
        }
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// `credentialSubject.id`
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn claims(&self) -> &Json {
        &self.claims
    }
}

fn credential_subject_id(vc: &Json) -> Option<&str> {
    vc.get("credentialSubject")
        .and_then(|subject| subject.get("id"))
        .and_then(Json::as_str)
}

/// The caller's verified presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialClaimSet {
    holder: String,
    credentials: Vec<VerifiedCredential>,
    presentation: Json,
}

impl CredentialClaimSet {
    /// Build from a presentation object whose `verifiableCredential` entries
    /// are already decoded `vc` objects. No signature or binding checks are
    /// performed; use [CredentialVerifier::verify_presentation] for tokens.
    pub fn from_presentation_json(presentation: Json) -> Result<Self, PresentationError> {
        let holder = presentation
            .get("holder")
            .and_then(Json::as_str)
            .ok_or(PresentationError::HolderMismatch {
                holder: None,
                issuer: String::new(),
            })?
            .to_string();

        let credentials = match presentation.get("verifiableCredential") {
            Some(Json::Array(credentials)) => credentials
                .iter()
                .cloned()
                .map(VerifiedCredential::from_claims)
                .collect(),
            Some(credential @ Json::Object(_)) => {
                vec![VerifiedCredential::from_claims(credential.clone())]
            }
            _ => return Err(PresentationError::MissingCredentials),
        };

        Ok(Self {
            holder,
            credentials,
            presentation,
        })
    }

    /// Holder DID, equal to the presentation token's issuer and subject.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn credentials(&self) -> &[VerifiedCredential] {
        &self.credentials
    }

    pub fn presentation(&self) -> &Json {
        &self.presentation
    }

    /// The `vp` object with every embedded credential JWT replaced by its
    /// decoded `vc` object.
    pub fn to_presentation_json(&self) -> Json {
        self.presentation.clone()
    }
}

/// Claims of a compact JWS, without checking the signature.
fn decode_claims(token: &str) -> Result<Map<String, Json>, PresentationError> {
    let (_, payload_b64, _) = ssi::claims::jws::split_jws(token)
        .map_err(|e| PresentationError::Malformed(e.to_string()))?;

    let payload = BASE64_URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| PresentationError::Malformed(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&payload)
        .map_err(|e| PresentationError::Malformed(format!("payload is not a JSON object: {e}")))
}

fn string_claim<'a>(claims: &'a Map<String, Json>, name: &str) -> Option<&'a str> {
    claims.get(name).and_then(Json::as_str)
}

fn numeric_claim(claims: &Map<String, Json>, name: &str) -> Option<i64> {
    claims
        .get(name)
        .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|v| v as i64)))
}

/// Verifies JWT presentations and the credentials embedded in them.
pub struct CredentialVerifier<R> {
    resolver: R,
    clock_skew: Duration,
    trust_anchor_did: Option<String>,
}

impl<R: DidResolver + Send + Sync> CredentialVerifier<R> {
    pub fn new(resolver: R, config: &IdentityConfig) -> Self {
        Self {
            resolver,
            clock_skew: config.clock_skew(),
            trust_anchor_did: config.trust_anchor_did.clone(),
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    fn check_validity_window(&self, claims: &Map<String, Json>) -> Result<(), PresentationError> {
        let now = chrono::Utc::now().timestamp();
        let skew = i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX);

        if let Some(exp) = numeric_claim(claims, "exp") {
            if now > exp.saturating_add(skew) {
                return Err(PresentationError::Expired);
            }
        }

        for claim in ["nbf", "iat"] {
            if let Some(not_before) = numeric_claim(claims, claim) {
                if now.saturating_add(skew) < not_before {
                    return Err(PresentationError::NotYetValid);
                }
            }
        }

        Ok(())
    }

    /// Verify `token` against the key of `signer`, or of its own `iss` claim.
    ///
    /// Only the presentation itself is checked against its `iss`. Credentials
    /// always name the trust anchor as `signer`.
    async fn verify_token(
        &self,
        token: &str,
        signer: Option<&str>,
    ) -> Result<Map<String, Json>, PresentationError> {
        let unverified = decode_claims(token)?;

        let signer = match signer {
            Some(signer) => signer,
            None => string_claim(&unverified, "iss").ok_or(PresentationError::MissingIssuer)?,
        };

        let jwk = self.resolver.resolve(signer).await?;

        let verified: Json = ssi::claims::jwt::decode_verify(token, &jwk)
            .map_err(|e| PresentationError::InvalidSignature(e.to_string()))?;

        let Json::Object(claims) = verified else {
            return Err(PresentationError::Malformed(
                "claims are not a JSON object".into(),
            ));
        };

        self.check_validity_window(&claims)?;

        Ok(claims)
    }

    /// Verify a JWT verifiable presentation and every credential it embeds.
    ///
    /// The presentation must be self-issued (`iss == sub`), its `holder` must
    /// be that issuer, and each credential's subject must be that issuer too.
    /// Every credential must be signed by the configured trust anchor; without
    /// one no presentation verifies.
    pub async fn verify_presentation(
        &self,
        token: &str,
    ) -> Result<CredentialClaimSet, PresentationError> {
        let mut claims = self.verify_token(token, None).await?;

        let subject = string_claim(&claims, "sub")
            .ok_or(PresentationError::MissingSubject)?
            .to_string();
        let issuer = string_claim(&claims, "iss")
            .ok_or(PresentationError::MissingIssuer)?
            .to_string();

        if issuer != subject {
            return Err(PresentationError::IssuerSubjectMismatch { issuer, subject });
        }

        let Some(Json::Object(mut vp)) = claims.remove("vp") else {
            return Err(PresentationError::MissingPresentation);
        };

        let holder = vp.get("holder").and_then(Json::as_str);
        if holder != Some(issuer.as_str()) {
            return Err(PresentationError::HolderMismatch {
                holder: holder.map(String::from),
                issuer,
            });
        }

        let tokens: Vec<String> = match vp.remove("verifiableCredential") {
            Some(Json::String(token)) => vec![token],
            Some(Json::Array(entries)) => entries
                .into_iter()
                .map(|entry| match entry {
                    Json::String(token) => Ok(token),
                    _ => Err(PresentationError::Malformed(
                        "embedded credential is not a JWT".into(),
                    )),
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(PresentationError::MissingCredentials),
        };

        if tokens.is_empty() {
            return Err(PresentationError::MissingCredentials);
        }

        let anchor = self
            .trust_anchor_did
            .as_deref()
            .ok_or(PresentationError::NoTrustAnchor)?;

        let mut credentials = Vec::with_capacity(tokens.len());
        for token in &tokens {
            let mut vc_claims = self.verify_token(token, Some(anchor)).await?;

            let Some(vc) = vc_claims.remove("vc").filter(Json::is_object) else {
                return Err(PresentationError::MissingCredentialClaim);
            };

            let subject = credential_subject_id(&vc)
                .or_else(|| string_claim(&vc_claims, "sub"))
                .map(String::from);

            if subject.as_deref() != Some(issuer.as_str()) {
                return Err(PresentationError::CredentialSubjectMismatch { subject, issuer });
            }

            let mut credential = VerifiedCredential::from_claims(vc);
            credential.subject = subject;
            if credential.issuer.is_none() {
                credential.issuer = string_claim(&vc_claims, "iss").map(String::from);
            }
            credentials.push(credential);
        }

        vp.insert(
            "verifiableCredential".into(),
            Json::Array(
                credentials
                    .iter()
                    .map(|credential| credential.claims.clone())
                    .collect(),
            ),
        );

        debug!(
            "verified presentation from {issuer} with {} credential(s)",
            credentials.len()
        );

        Ok(CredentialClaimSet {
            holder: issuer,
            credentials,
            presentation: Json::Object(vp),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use base64::prelude::*;
    use p256::ecdsa::{signature::Signer, Signature, SigningKey};
    use serde_json::json;

    use super::*;
    use crate::core::identity::did::{
        did_web_document_url,
        tests::{did_document, DocumentServer},
        DidWebResolver,
    };

    /// An ES256 key bound to a did:web identifier.
    pub(crate) struct TestIdentity {
        pub(crate) did: String,
        key: SigningKey,
    }

    impl TestIdentity {
        pub(crate) fn new(host: &str) -> Self {
            Self {
                did: format!("did:web:{host}"),
                key: SigningKey::random(&mut rand::thread_rng()),
            }
        }

        pub(crate) fn jwk(&self) -> Json {
            let pk: p256::PublicKey = self.key.verifying_key().into();
            serde_json::from_str(&pk.to_jwk_string()).unwrap()
        }

        pub(crate) fn sign(&self, claims: &Json) -> String {
            let header = json!({
                "alg": "ES256",
                "typ": "JWT",
                "kid": format!("{}#key-1", self.did),
            });
            let header_b64 = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
            let body_b64 = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
            let payload = [header_b64.as_bytes(), b".", body_b64.as_bytes()].concat();
            let signature: Signature = self.key.sign(&payload);
            let signature_b64 = BASE64_URL_SAFE_NO_PAD.encode(signature.to_vec());
            format!("{header_b64}.{body_b64}.{signature_b64}")
        }

        pub(crate) fn issue_credential(&self, subject: &str, types: &[&str]) -> String {
            let now = chrono::Utc::now().timestamp();
            self.sign(&json!({
                "iss": self.did,
                "sub": subject,
                "iat": now,
                "exp": now + 3600,
                "vc": {
                    "@context": ["https://www.w3.org/2018/credentials/v1"],
                    "type": types,
                    "issuer": self.did,
                    "credentialSubject": { "id": subject },
                }
            }))
        }

        pub(crate) fn present(&self, credentials: &[String]) -> String {
            let now = chrono::Utc::now().timestamp();
            self.sign(&json!({
                "iss": self.did,
                "sub": self.did,
                "iat": now,
                "exp": now + 300,
                "vp": {
                    "@context": ["https://www.w3.org/2018/credentials/v1"],
                    "type": ["VerifiablePresentation"],
                    "holder": self.did,
                    "verifiableCredential": credentials,
                }
            }))
        }
    }

    pub(crate) fn server_for(identities: &[&TestIdentity]) -> DocumentServer {
        identities
            .iter()
            .fold(DocumentServer::default(), |server, identity| {
                let url = did_web_document_url(&identity.did).unwrap();
                server.with_document(url.as_str(), did_document(&identity.did, identity.jwk()))
            })
    }

    fn verifier(
        identities: &[&TestIdentity],
        config: &IdentityConfig,
    ) -> CredentialVerifier<DidWebResolver<DocumentServer>> {
        CredentialVerifier::new(DidWebResolver::new(server_for(identities), config), config)
    }

    pub(crate) fn anchored_by(anchor: &TestIdentity) -> IdentityConfig {
        IdentityConfig {
            trust_anchor_did: Some(anchor.did.clone()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn verifies_presentation_and_decodes_credentials() {
        let issuer = TestIdentity::new("issuer.example");
        let holder = TestIdentity::new("holder.example");
        let vc = issuer.issue_credential(
            &holder.did,
            &["VerifiableCredential", "DataCellarCredential"],
        );
        let vp = holder.present(&[vc]);

        let claims = verifier(&[&issuer, &holder], &anchored_by(&issuer))
            .verify_presentation(&vp)
            .await
            .unwrap();

        assert_eq!(claims.holder(), holder.did);
        assert_eq!(claims.credentials().len(), 1);
        assert_eq!(claims.credentials()[0].issuer(), Some(issuer.did.as_str()));
        assert_eq!(claims.credentials()[0].subject(), Some(holder.did.as_str()));

        let presentation = claims.to_presentation_json();
        assert_eq!(presentation["holder"], holder.did);
        assert_eq!(
            presentation["verifiableCredential"][0]["type"][1],
            "DataCellarCredential"
        );
    }

    #[tokio::test]
    async fn trust_anchor_signs_credentials() {
        let anchor = TestIdentity::new("anchor.example");
        let impostor = TestIdentity::new("impostor.example");
        let holder = TestIdentity::new("holder.example");
        let verifier = verifier(&[&anchor, &impostor, &holder], &anchored_by(&anchor));

        let good =
            holder.present(&[anchor.issue_credential(&holder.did, &["VerifiableCredential"])]);
        verifier.verify_presentation(&good).await.unwrap();

        let bad =
            holder.present(&[impostor.issue_credential(&holder.did, &["VerifiableCredential"])]);
        assert!(matches!(
            verifier.verify_presentation(&bad).await,
            Err(PresentationError::InvalidSignature(_))
        ));

        let self_issued =
            holder.present(&[holder.issue_credential(&holder.did, &["DataCellarCredential"])]);
        assert!(matches!(
            verifier.verify_presentation(&self_issued).await,
            Err(PresentationError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn credentials_need_a_trust_anchor() {
        let holder = TestIdentity::new("holder.example");
        let verifier = verifier(&[&holder], &IdentityConfig::default());

        let self_issued =
            holder.present(&[holder.issue_credential(&holder.did, &["DataCellarCredential"])]);
        let err = verifier.verify_presentation(&self_issued).await.unwrap_err();
        assert!(matches!(err, PresentationError::NoTrustAnchor));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn reports_the_violated_binding() {
        let issuer = TestIdentity::new("issuer.example");
        let holder = TestIdentity::new("holder.example");
        let other = TestIdentity::new("other.example");
        let verifier = verifier(&[&issuer, &holder, &other], &anchored_by(&issuer));
        let now = chrono::Utc::now().timestamp();
        let vc = issuer.issue_credential(&holder.did, &["VerifiableCredential"]);

        let missing_sub = holder.sign(&json!({ "iss": holder.did, "vp": {} }));
        assert!(matches!(
            verifier.verify_presentation(&missing_sub).await,
            Err(PresentationError::MissingSubject)
        ));

        let missing_iss = holder.sign(&json!({ "sub": holder.did }));
        assert!(matches!(
            verifier.verify_presentation(&missing_iss).await,
            Err(PresentationError::MissingIssuer)
        ));

        let not_self_issued = holder.sign(&json!({ "iss": holder.did, "sub": other.did }));
        assert!(matches!(
            verifier.verify_presentation(&not_self_issued).await,
            Err(PresentationError::IssuerSubjectMismatch { .. })
        ));

        let no_vp = holder.sign(&json!({ "iss": holder.did, "sub": holder.did }));
        assert!(matches!(
            verifier.verify_presentation(&no_vp).await,
            Err(PresentationError::MissingPresentation)
        ));

        let wrong_holder = holder.sign(&json!({
            "iss": holder.did, "sub": holder.did,
            "vp": { "holder": other.did, "verifiableCredential": [vc] }
        }));
        assert!(matches!(
            verifier.verify_presentation(&wrong_holder).await,
            Err(PresentationError::HolderMismatch { .. })
        ));

        let no_credentials = holder.sign(&json!({
            "iss": holder.did, "sub": holder.did, "iat": now,
            "vp": { "holder": holder.did }
        }));
        assert!(matches!(
            verifier.verify_presentation(&no_credentials).await,
            Err(PresentationError::MissingCredentials)
        ));

        let someone_elses = other.present(&[vc]);
        assert!(matches!(
            verifier.verify_presentation(&someone_elses).await,
            Err(PresentationError::CredentialSubjectMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_forged_and_expired_tokens() {
        let holder = TestIdentity::new("holder.example");
        let forger = TestIdentity::new("forger.example");
        let issuer = TestIdentity::new("issuer.example");
        let verifier = verifier(&[&holder, &issuer], &anchored_by(&issuer));
        let vc = issuer.issue_credential(&holder.did, &["VerifiableCredential"]);

        let forged = forger.sign(&json!({
            "iss": holder.did, "sub": holder.did,
            "vp": { "holder": holder.did, "verifiableCredential": [vc] }
        }));
        assert!(matches!(
            verifier.verify_presentation(&forged).await,
            Err(PresentationError::InvalidSignature(_))
        ));

        let long_ago = chrono::Utc::now().timestamp() - 3600;
        let expired = holder.sign(&json!({
            "iss": holder.did, "sub": holder.did, "exp": long_ago,
            "vp": { "holder": holder.did, "verifiableCredential": [vc] }
        }));
        assert!(matches!(
            verifier.verify_presentation(&expired).await,
            Err(PresentationError::Expired)
        ));

        // Within the default five minute skew.
        let just_expired = holder.sign(&json!({
            "iss": holder.did, "sub": holder.did,
            "exp": chrono::Utc::now().timestamp() - 60,
            "vp": { "holder": holder.did, "verifiableCredential": [vc] }
        }));
        verifier.verify_presentation(&just_expired).await.unwrap();

        assert!(matches!(
            verifier.verify_presentation("not-a-jwt").await,
            Err(PresentationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn unknown_signer_is_a_resolution_failure() {
        let holder = TestIdentity::new("holder.example");
        let verifier = verifier(&[], &IdentityConfig::default());
        let err = verifier
            .verify_presentation(&holder.present(&[]))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn claim_set_from_decoded_presentation() {
        let claims = CredentialClaimSet::from_presentation_json(json!({
            "holder": "did:web:holder.example",
            "verifiableCredential": [{
                "type": ["VerifiableCredential"],
                "issuer": { "id": "did:web:issuer.example" },
                "credentialSubject": { "id": "did:web:holder.example" }
            }]
        }))
        .unwrap();
        assert_eq!(claims.holder(), "did:web:holder.example");
        assert_eq!(
            claims.credentials()[0].issuer(),
            Some("did:web:issuer.example")
        );

        assert!(matches!(
            CredentialClaimSet::from_presentation_json(json!({ "holder": "did:web:x" })),
            Err(PresentationError::MissingCredentials)
        ));
    }
}
