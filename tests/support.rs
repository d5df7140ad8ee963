#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use async_trait::async_trait;
use base64::prelude::*;
use http::{Request, Response};
use openapi_connector::core::{identity::did::did_web_document_url, util::AsyncHttpClient};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde_json::{json, Value};

#[derive(Default)]
struct Routes {
    responses: HashMap<String, (u16, Vec<u8>)>,
    requests: Vec<Request<Vec<u8>>>,
}

/// Serves canned responses by url and records every request.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    routes: Arc<Mutex<Routes>>,
}

impl MockHttpClient {
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), (status, body.into()));
        self
    }

    pub fn respond_json(&self, url: &str, body: &Value) -> &Self {
        self.respond(url, 200, serde_json::to_vec(body).unwrap())
    }

    /// Publish the DID document of `identity` at its did:web location.
    pub fn publish(&self, identity: &TestIdentity) -> &Self {
        let url = did_web_document_url(&identity.did).unwrap();
        self.respond_json(url.as_str(), &identity.did_document())
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.routes
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|request| request.uri() == url)
            .count()
    }

    pub fn last_body_sent_to(&self, url: &str) -> Option<Value> {
        self.routes
            .lock()
            .unwrap()
            .requests
            .iter()
            .rev()
            .find(|request| request.uri() == url)
            .map(|request| serde_json::from_slice(request.body()).unwrap())
    }
}

#[async_trait]
impl AsyncHttpClient for MockHttpClient {
    async fn execute(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>> {
        let mut routes = self.routes.lock().unwrap();
        let url = request.uri().to_string();
        routes.requests.push(request);

        let (status, body) = routes
            .responses
            .get(&url)
            .cloned()
            .unwrap_or((404, Vec::new()));

        Ok(Response::builder().status(status).body(body)?)
    }
}

/// An ES256 key bound to a did:web identifier.
pub struct TestIdentity {
    pub did: String,
    key: SigningKey,
}

impl TestIdentity {
    pub fn new(host: &str) -> Self {
        Self {
            did: format!("did:web:{host}"),
            key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    pub fn did_document(&self) -> Value {
        let pk: p256::PublicKey = self.key.verifying_key().into();
        let jwk: Value = serde_json::from_str(&pk.to_jwk_string()).unwrap();
        json!({
            "@context": ["https://www.w3.org/ns/did/v1"],
            "id": self.did,
            "verificationMethod": [{
                "id": format!("{}#key-1", self.did),
                "type": "JsonWebKey2020",
                "controller": self.did,
                "publicKeyJwk": jwk,
            }]
        })
    }

    pub fn sign(&self, claims: &Value) -> String {
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

    pub fn issue_credential(&self, subject: &str, types: &[&str]) -> String {
        let now = chrono::Utc::now().timestamp();
        self.sign(&json!({
            "iss": self.did,
            "sub": subject,
            "nbf": now,
            "exp": now + 3600,
            "vc": {
                "@context": ["https://www.w3.org/2018/credentials/v1"],
                "type": types,
                "issuer": self.did,
                "issuanceDate": chrono::Utc::now().to_rfc3339(),
                "credentialSubject": { "id": subject },
            }
        }))
    }

    pub fn present(&self, credentials: &[String]) -> String {
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
