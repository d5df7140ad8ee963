//! Compilation of an OpenAPI document into the resource, policy and contract
//! graph registered with the dataspace runtime.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    openapi::{OpenApiDocument, Operation, RequestBody},
    policy::{PolicyCompiler, PolicyDescriptor},
    presentation_definition::{
        PresentationDefinition, ValidationError, PRESENTATION_DEFINITION_EXTENSION,
    },
    resource::{AssetMetadata, ContractDescriptor, ResourceDescriptor},
    transport::classify,
    util::{base_request, AsyncHttpClient},
};
use crate::{
    config::ConnectorConfig,
    utils::{slugify, SlugCase},
};

/// Request body types chosen over any other declared type, in order.
pub const PREFERRED_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "application/zip",
    "application/x-zip-compressed",
];

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("no OpenAPI document location configured")]
    MissingSource,

    #[error("unable to retrieve the OpenAPI document from {location}: {reason}")]
    Unreachable { location: String, reason: String },

    #[error("OpenAPI document could not be parsed: {0}")]
    Unparsable(String),

    #[error("unsupported OpenAPI version `{0}`, expected 3.x")]
    UnsupportedVersion(String),

    #[error("reference `{0}` does not resolve to a local component")]
    UnresolvedReference(String),

    #[error("reference `{0}` does not terminate")]
    ReferenceCycle(String),

    #[error("{method} {path}: {source}")]
    InvalidOperation {
        method: String,
        path: String,
        #[source]
        source: ValidationError,
    },
}

/// A parsed document and the url it was fetched from, if any.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: OpenApiDocument,
    pub retrieval_url: Option<Url>,
}

/// Fetch `source` over http(s), or read it from the filesystem otherwise.
pub async fn load_document<C>(source: &str, client: &C) -> Result<LoadedDocument, SchemaError>
where
    C: AsyncHttpClient + Send + Sync,
{
    let unreachable = |reason: String| SchemaError::Unreachable {
        location: source.to_string(),
        reason,
    };

    match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            debug!("fetching OpenAPI document from {url}");
            let request = base_request()
                .method("GET")
                .uri(url.as_str())
                .header(
                    http::header::ACCEPT,
                    "application/json, application/yaml;q=0.9, */*;q=0.5",
                )
                .body(Vec::new())
                .map_err(|e| unreachable(e.to_string()))?;

            let response = client
                .execute(request)
                .await
                .map_err(|e| unreachable(format!("{e:#}")))?;

            if !response.status().is_success() {
                return Err(unreachable(format!("responded with {}", response.status())));
            }

            Ok(LoadedDocument {
                document: OpenApiDocument::from_slice(response.body())?,
                retrieval_url: Some(url),
            })
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| unreachable("not a local file path".into()))?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            Ok(LoadedDocument {
                document: OpenApiDocument::from_slice(&bytes)?,
                retrieval_url: None,
            })
        }
        _ => {
            let bytes = tokio::fs::read(source)
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            Ok(LoadedDocument {
                document: OpenApiDocument::from_slice(&bytes)?,
                retrieval_url: None,
            })
        }
    }
}

/// Everything produced by one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledGraph {
    pub resources: Vec<ResourceDescriptor>,
    pub policies: Vec<PolicyDescriptor>,
    pub contracts: Vec<ContractDescriptor>,
}

impl CompiledGraph {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|resource| resource.id() == id)
    }

    pub fn contract_for(&self, resource: &ResourceDescriptor) -> Option<&ContractDescriptor> {
        self.contracts
            .iter()
            .find(|contract| contract.governs(resource))
    }

    /// The access policy governing `resource`.
    pub fn policy_for(&self, resource: &ResourceDescriptor) -> Option<&PolicyDescriptor> {
        let contract = self.contract_for(resource)?;
        self.policies
            .iter()
            .find(|policy| policy.id() == contract.access_policy_id())
    }
}

/// Pick the wire content type of an operation's request body.
pub fn select_content_type(request_body: Option<&RequestBody>) -> String {
    let Some(request_body) = request_body else {
        return DEFAULT_CONTENT_TYPE.to_string();
    };

    let declared = |wanted: &str| {
        request_body
            .media_types()
            .find(|media_type| media_type.eq_ignore_ascii_case(wanted))
    };

    PREFERRED_CONTENT_TYPES
        .iter()
        .chain(std::iter::once(&DEFAULT_CONTENT_TYPE))
        .find_map(|preferred| declared(preferred))
        .or_else(|| request_body.media_types().next())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

pub struct SchemaCompiler {
    base_url_override: Option<String>,
    slug_case: SlugCase,
    force_binary_safe: bool,
    continue_on_schema_error: bool,
    policy_compiler: PolicyCompiler,
}

impl SchemaCompiler {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            base_url_override: config.base_url.as_ref().map(|url| url.as_str().to_string()),
            slug_case: if config.slugify_lowercase {
                SlugCase::Lower
            } else {
                SlugCase::Preserve
            },
            force_binary_safe: config.force_binary_safe,
            continue_on_schema_error: config.continue_on_schema_error,
            policy_compiler: PolicyCompiler::new(config.authorization.enabled),
        }
    }

    /// Configured override, then the first declared server, then the origin
    /// the document was retrieved from.
    pub fn resolve_base_url(
        &self,
        document: &OpenApiDocument,
        retrieval_url: Option<&Url>,
    ) -> Option<String> {
        if let Some(base_url) = &self.base_url_override {
            return Some(base_url.clone());
        }

        if let Some(server) = document.servers.first() {
            let url = server.resolved_url();
            // Server urls may be relative to the document location.
            let url = match (Url::parse(&url), retrieval_url) {
                (Err(url::ParseError::RelativeUrlWithoutBase), Some(retrieval_url)) => {
                    match retrieval_url.join(&url) {
                        Ok(joined) => joined.to_string(),
                        Err(_) => url,
                    }
                }
                _ => url,
            };
            return Some(url.trim_end_matches('/').to_string());
        }

        retrieval_url
            .map(|url| url.origin())
            .filter(|origin| origin.is_tuple())
            .map(|origin| origin.ascii_serialization())
    }

    fn unique_id(&self, method: &str, path: &str, seen: &mut HashSet<String>) -> String {
        let base = slugify(&format!("{method}-{path}"), self.slug_case);
        let mut id = base.clone();
        let mut n = 2;
        while !seen.insert(id.clone()) {
            id = format!("{base}-{n}");
            n += 1;
        }
        id
    }

    fn presentation_definition(
        operation: &Operation,
    ) -> Result<Option<PresentationDefinition>, ValidationError> {
        operation
            .extension(PRESENTATION_DEFINITION_EXTENSION)
            .map(PresentationDefinition::from_extension)
            .transpose()
    }

    pub fn compile(
        &self,
        document: &OpenApiDocument,
        retrieval_url: Option<&Url>,
    ) -> Result<CompiledGraph, SchemaError> {
        let base_url = self.resolve_base_url(document, retrieval_url).unwrap_or_else(|| {
            warn!("no base url configured, declared or derivable; resources will use relative paths");
            String::new()
        });
        debug!("compiling `{}` against base url {base_url}", document.info.title);

        let mut graph = CompiledGraph::default();
        let mut seen = HashSet::new();

        for (path, item) in &document.paths {
            let item = match document.path_item(item) {
                Ok(item) => item,
                Err(e) if self.continue_on_schema_error => {
                    warn!("skipping {path}: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (method, operation) in item.operations() {
                let request_body = match operation
                    .request_body
                    .as_ref()
                    .map(|body| document.request_body(body))
                    .transpose()
                {
                    Ok(request_body) => request_body,
                    Err(e) if self.continue_on_schema_error => {
                        warn!("skipping {method} {path}: {e}");
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let id = self.unique_id(method, path, &mut seen);

                let policy = match Self::presentation_definition(operation).and_then(|definition| {
                    self.policy_compiler.compile(&id, definition.as_ref())
                }) {
                    Ok(policy) => policy,
                    Err(source) if self.continue_on_schema_error => {
                        warn!("skipping {method} {path}: {source}");
                        continue;
                    }
                    Err(source) => {
                        return Err(SchemaError::InvalidOperation {
                            method: method.to_string(),
                            path: path.clone(),
                            source,
                        })
                    }
                };

                let content_type = select_content_type(request_body);
                let transport_type =
                    classify(&content_type, self.force_binary_safe, request_body.is_some());

                let resource = ResourceDescriptor::new(
                    id,
                    base_url.clone(),
                    path.clone(),
                    method.to_string(),
                    content_type,
                    transport_type,
                    request_body.is_some(),
                    AssetMetadata {
                        operation_id: operation.operation_id.clone(),
                        title: operation.summary.clone(),
                        description: operation.description.clone(),
                        tags: operation.tags.clone(),
                    },
                );

                info!(
                    "created resource {} ({}, {:?})",
                    resource.id(),
                    resource.content_type(),
                    resource.transport_type()
                );

                graph
                    .contracts
                    .push(ContractDescriptor::new(resource.id(), policy.id()));
                graph.policies.push(policy);
                graph.resources.push(resource);
            }
        }

        Ok(graph)
    }

    /// Load the document at `source` and compile it.
    ///
    /// With `continue_on_schema_error`, a document that cannot be loaded or
    /// compiled yields an empty graph instead of an error.
    pub async fn compile_source<C>(
        &self,
        source: Option<&str>,
        client: &C,
    ) -> Result<CompiledGraph, SchemaError>
    where
        C: AsyncHttpClient + Send + Sync,
    {
        let result = match source {
            Some(source) => match load_document(source, client).await {
                Ok(loaded) => self.compile(&loaded.document, loaded.retrieval_url.as_ref()),
                Err(e) => Err(e),
            },
            None => Err(SchemaError::MissingSource),
        };

        match result {
            Err(e) if self.continue_on_schema_error => {
                warn!("{e}; continuing with no resources");
                Ok(CompiledGraph::default())
            }
            result => result,
        }
    }
}
