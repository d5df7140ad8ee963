use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value as Json;
use ssi::jwk::JWK;
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::IdentityConfig,
    core::util::{base_request, AsyncHttpClient},
};

pub const DID_WEB_PREFIX: &str = "did:web:";

const DID_DOCUMENT_ACCEPT: &str = "application/ld+json";

/// Upper bound on a single DID document fetch.
pub const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("unsupported DID method in `{0}`: only did:web is supported")]
    UnsupportedMethod(String),

    #[error("malformed did:web identifier `{0}`")]
    MalformedDid(String),

    #[error("timed out fetching the DID document for {did}")]
    Timeout { did: String },

    #[error("DID document for {did} could not be fetched: {reason}")]
    Unavailable { did: String, reason: String },

    #[error("DID document for {did} is invalid: {reason}")]
    InvalidDocument { did: String, reason: String },
}

/// Resolves a DID to the public key its controller signs with.
#[async_trait]
pub trait DidResolver {
    async fn resolve(&self, did: &str) -> Result<JWK, ResolutionError>;
}

#[async_trait]
impl<T: DidResolver + Send + Sync + ?Sized> DidResolver for Arc<T> {
    async fn resolve(&self, did: &str) -> Result<JWK, ResolutionError> {
        (**self).resolve(did).await
    }
}

/// Drop any DID URL fragment or query, leaving the bare DID.
pub fn bare_did(did: &str) -> &str {
    did.split(['#', '?']).next().unwrap_or(did)
}

/// Location of the DID document for a `did:web` identifier.
///
/// `did:web:example.com` lives at `https://example.com/.well-known/did.json`,
/// `did:web:example.com:user:alice` at `https://example.com/user/alice/did.json`.
/// A port is percent-encoded in the host segment (`example.com%3A8443`).
pub fn did_web_document_url(did: &str) -> Result<Url, ResolutionError> {
    let did = bare_did(did);
    let Some(method_specific_id) = did.strip_prefix(DID_WEB_PREFIX) else {
        return Err(ResolutionError::UnsupportedMethod(did.to_string()));
    };

    let mut segments = method_specific_id.split(':');
    let host = segments
        .next()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ResolutionError::MalformedDid(did.to_string()))?
        .replace("%3A", ":")
        .replace("%3a", ":");

    let path: Vec<&str> = segments.collect();
    if path.iter().any(|segment| segment.is_empty()) {
        return Err(ResolutionError::MalformedDid(did.to_string()));
    }

    let location = if path.is_empty() {
        format!("https://{host}/.well-known/did.json")
    } else {
        format!("https://{host}/{}/did.json", path.join("/"))
    };

    Url::parse(&location).map_err(|_| ResolutionError::MalformedDid(did.to_string()))
}

/// The key of the first verification method of a DID document.
///
/// Universal resolver responses wrap the document in `didDocument`; both shapes
/// are accepted.
pub fn first_verification_key(did: &str, document: &Json) -> Result<JWK, ResolutionError> {
    let document = document.get("didDocument").unwrap_or(document);

    let invalid = |reason: &str| ResolutionError::InvalidDocument {
        did: did.to_string(),
        reason: reason.to_string(),
    };

    let method = document
        .get("verificationMethod")
        .and_then(Json::as_array)
        .and_then(|methods| methods.first())
        .ok_or_else(|| invalid("no verificationMethod"))?;

    let jwk = method
        .get("publicKeyJwk")
        .ok_or_else(|| invalid("first verification method has no publicKeyJwk"))?;

    serde_json::from_value(jwk.clone()).map_err(|e| ResolutionError::InvalidDocument {
        did: did.to_string(),
        reason: format!("publicKeyJwk is not a valid JWK: {e}"),
    })
}

/// One resolved DID. Replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct DidCacheEntry {
    pub did: String,
    pub document: Json,
    pub key: JWK,
    pub resolved_at: Instant,
}

/// `did:web` resolver with a per-DID TTL cache.
///
/// Concurrent misses on the same DID are collapsed into one fetch. While an
/// expired entry is being refreshed, other callers keep receiving the expired
/// key instead of waiting on the network.
pub struct DidWebResolver<C> {
    client: C,
    resolver_url: Option<Url>,
    ttl: Duration,
    timeout: Duration,
    cache: RwLock<HashMap<String, DidCacheEntry>>,
    refreshes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    fetches: AtomicUsize,
}

impl<C: AsyncHttpClient + Send + Sync> DidWebResolver<C> {
    pub fn new(client: C, config: &IdentityConfig) -> Self {
        Self {
            client,
            resolver_url: config.resolver_url.clone(),
            ttl: config.did_cache_ttl(),
            timeout: DEFAULT_RESOLUTION_TIMEOUT,
            cache: RwLock::new(HashMap::new()),
            refreshes: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of DID documents fetched over the network so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// The live cache entry for `did`, if any.
    pub async fn cached(&self, did: &str) -> Option<DidCacheEntry> {
        self.cache
            .read()
            .await
            .get(bare_did(did))
            .filter(|entry| entry.resolved_at.elapsed() < self.ttl)
            .cloned()
    }

    fn document_url(&self, did: &str) -> Result<Url, ResolutionError> {
        // Validates the method even when a universal resolver does the lookup.
        let native = did_web_document_url(did)?;

        match &self.resolver_url {
            Some(resolver) => {
                let location = format!("{}/{did}", resolver.as_str().trim_end_matches('/'));
                Url::parse(&location).map_err(|_| ResolutionError::MalformedDid(did.to_string()))
            }
            None => Ok(native),
        }
    }

    async fn fetch(&self, did: &str) -> Result<DidCacheEntry, ResolutionError> {
        let url = self.document_url(did)?;
        debug!("fetching DID document for {did} from {url}");
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let unavailable = |reason: String| ResolutionError::Unavailable {
            did: did.to_string(),
            reason,
        };

        let request = base_request()
            .method("GET")
            .uri(url.as_str())
            .header(http::header::ACCEPT, DID_DOCUMENT_ACCEPT)
            .body(Vec::new())
            .map_err(|e| unavailable(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.execute(request))
            .await
            .map_err(|_| ResolutionError::Timeout {
                did: did.to_string(),
            })?
            .map_err(|e| unavailable(format!("{e:#}")))?;

        if !response.status().is_success() {
            return Err(unavailable(format!(
                "document service responded with {}",
                response.status()
            )));
        }

        let document: Json =
            serde_json::from_slice(response.body()).map_err(|e| ResolutionError::InvalidDocument {
                did: did.to_string(),
                reason: e.to_string(),
            })?;

        let key = first_verification_key(did, &document)?;

        Ok(DidCacheEntry {
            did: did.to_string(),
            document,
            key,
            resolved_at: Instant::now(),
        })
    }

    async fn refresh_lock(&self, did: &str) -> Arc<Mutex<()>> {
        self.refreshes
            .lock()
            .await
            .entry(did.to_string())
            .or_default()
            .clone()
    }

    /// Drop the refresh lock for `did` once nobody else holds it.
    async fn release_refresh_lock(&self, did: &str, lock: Arc<Mutex<()>>) {
        let mut refreshes = self.refreshes.lock().await;
        drop(lock);
        if refreshes
            .get(did)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            refreshes.remove(did);
        }
    }

    /// Store `entry`, evicting every expired entry.
    async fn store(&self, entry: DidCacheEntry) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, cached| cached.resolved_at.elapsed() < self.ttl);
        cache.insert(entry.did.clone(), entry);
    }

    /// Return the cached key for `did`, fetching it when absent or expired.
    pub async fn get_or_fetch(&self, did: &str) -> Result<JWK, ResolutionError> {
        let did = bare_did(did);

        let stale = match self.cache.read().await.get(did) {
            Some(entry) if entry.resolved_at.elapsed() < self.ttl => {
                debug!("DID cache hit for {did}");
                return Ok(entry.key.clone());
            }
            Some(entry) => Some(entry.key.clone()),
            None => None,
        };

        let lock = self.refresh_lock(did).await;
        let result = self.refresh(did, stale, &lock).await;
        self.release_refresh_lock(did, lock).await;
        result
    }

    async fn refresh(
        &self,
        did: &str,
        stale: Option<JWK>,
        lock: &Mutex<()>,
    ) -> Result<JWK, ResolutionError> {
        let _guard = match stale {
            Some(stale_key) => match lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("refresh of {did} already in flight, serving expired entry");
                    return Ok(stale_key);
                }
            },
            None => lock.lock().await,
        };

        // Another task may have completed the fetch before we took the lock.
        if let Some(entry) = self.cached(did).await {
            return Ok(entry.key);
        }
        debug!("DID cache miss for {did}");

        let entry = match self.fetch(did).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("unable to resolve {did}: {e}");
                return Err(e);
            }
        };

        let key = entry.key.clone();
        self.store(entry).await;
        Ok(key)
    }
}

#[async_trait]
impl<C: AsyncHttpClient + Send + Sync> DidResolver for DidWebResolver<C> {
    async fn resolve(&self, did: &str) -> Result<JWK, ResolutionError> {
        self.get_or_fetch(did).await
    }
}
