//! This library exposes the operations of an OpenAPI-described backend as
//! dataspace resources, and decides which callers may use them based on the
//! verifiable credentials they present.
//!
//! # Compiling Resources
//!
//! An OpenAPI 3.x document is compiled into a [`CompiledGraph`]: one
//! [`ResourceDescriptor`] per operation, one [`PolicyDescriptor`] per resource,
//! and one [`ContractDescriptor`] binding the two.
//!
//! ```ignore
//! use openapi_connector::config::ConnectorConfig;
//! use openapi_connector::core::compiler::SchemaCompiler;
//! use openapi_connector::core::util::ReqwestClient;
//!
//! let config = ConnectorConfig::from_env()?;
//! let client = ReqwestClient::new()?;
//!
//! let graph = SchemaCompiler::new(&config)
//!     .compile_source(config.openapi_url.as_deref(), &client)
//!     .await?;
//!
//! for resource in &graph.resources {
//!     println!("{} -> {}{}", resource.id(), resource.base_url(), resource.path());
//! }
//! ```
//!
//! An operation requests credentials through the
//! `x-connector-presentation-definition` extension:
//!
//! ```yaml
//! paths:
//!   /consumption:
//!     get:
//!       x-connector-presentation-definition:
//!         id: datacellar
//!         input_descriptors:
//!           - id: datacellar-credential
//!             constraints:
//!               fields:
//!                 - path: ["$.type"]
//!                   filter: { type: string, pattern: "^DataCellarCredential$" }
//! ```
//!
//! [`CompiledGraph`]: crate::core::compiler::CompiledGraph
//! [`ResourceDescriptor`]: crate::core::resource::ResourceDescriptor
//! [`PolicyDescriptor`]: crate::core::policy::PolicyDescriptor
//! [`ContractDescriptor`]: crate::core::resource::ContractDescriptor
//!
//! # Evaluating Access
//!
//! At request time, the caller's JWT presentation is verified by a
//! [`CredentialVerifier`] (keys come from `did:web` documents through a cached
//! [`DidWebResolver`]) and the resulting claims are checked by a
//! [`ConstraintEvaluator`].
//!
//! ```ignore
//! use std::sync::Arc;
//! use openapi_connector::core::identity::{CredentialVerifier, DidWebResolver};
//! use openapi_connector::core::policy::delegate::HttpDecisionDelegate;
//! use openapi_connector::core::policy::evaluator::{ConstraintEvaluator, ContractContext};
//!
//! let resolver = DidWebResolver::new(client.clone(), &config.identity);
//! let verifier = CredentialVerifier::new(resolver, &config.identity);
//! let delegate = config
//!     .delegate
//!     .clone()
//!     .map(|delegate| Arc::new(HttpDecisionDelegate::new(client.clone(), delegate)) as _);
//! let evaluator = ConstraintEvaluator::new(&config.authorization, delegate);
//!
//! let allowed = evaluator
//!     .evaluate_token(&verifier, policy, Some(&vp_jwt), &ContractContext::for_agreement(id))
//!     .await;
//! ```
//!
//! Embedded credentials must be signed by `identity.trust_anchor_did`; without
//! it every credential-type constraint denies. Authorization checks that cannot
//! reach a decision (no decision delegate, delegate down, DID documents
//! unreachable) resolve to the configured [`FailMode`], open by default. A
//! credential-type constraint never does: without verified claims it denies.
//!
//! [`CredentialVerifier`]: crate::core::identity::CredentialVerifier
//! [`DidWebResolver`]: crate::core::identity::DidWebResolver
//! [`ConstraintEvaluator`]: crate::core::policy::evaluator::ConstraintEvaluator
//! [`FailMode`]: crate::config::FailMode
//!
//! # Proxying
//!
//! Binary request bodies (multipart uploads, archives) would be corrupted by
//! the text-oriented transfer pipeline. Resources classified as
//! [`TransportType::BinarySafe`] carry their bodies base64-encoded behind a
//! marker between ingress and egress; see [`core::codec`] and [`core::proxy`].
//!
//! [`TransportType::BinarySafe`]: crate::core::transport::TransportType::BinarySafe
//! [`core::codec`]: crate::core::codec
//! [`core::proxy`]: crate::core::proxy

pub mod config;
pub mod core;
pub mod utils;
pub use serde_json_path::JsonPath;
