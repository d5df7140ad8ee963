use serde::{Deserialize, Serialize};

use super::transport::TransportType;

/// Which parts of the consumer's request the proxy forwards to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyFlags {
    pub forward_body: bool,
    pub forward_query_params: bool,
}

impl Default for ProxyFlags {
    fn default() -> Self {
        Self {
            forward_body: true,
            forward_query_params: true,
        }
    }
}

/// Descriptive metadata copied from the operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One backend operation exposed as a dataspace resource.
///
/// Produced once per compilation and never mutated; a new compilation produces
/// a new set of descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    id: String,
    display_name: String,
    base_url: String,
    path: String,
    method: String,
    content_type: String,
    transport_type: TransportType,
    proxy_flags: ProxyFlags,
    has_request_body: bool,
    #[serde(default)]
    metadata: AssetMetadata,
}

impl ResourceDescriptor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        base_url: String,
        path: String,
        method: String,
        content_type: String,
        transport_type: TransportType,
        has_request_body: bool,
        metadata: AssetMetadata,
    ) -> Self {
        let display_name = match &metadata.operation_id {
            Some(operation_id) => format!("{method} {path} ({operation_id})"),
            None => format!("{method} {path}"),
        };

        Self {
            id,
            display_name,
            base_url,
            path,
            method,
            content_type,
            transport_type,
            proxy_flags: ProxyFlags::default(),
            has_request_body,
            metadata,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Upper-case HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    pub fn proxy_flags(&self) -> ProxyFlags {
        self.proxy_flags
    }

    pub fn has_request_body(&self) -> bool {
        self.has_request_body
    }

    pub fn metadata(&self) -> &AssetMetadata {
        &self.metadata
    }

    /// Name of the backend data address registered for this resource.
    pub fn data_address_name(&self) -> String {
        format!("data-address-{}", self.id)
    }
}

/// Binds a policy to the resources it governs (always exactly one here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDescriptor {
    id: String,
    access_policy_id: String,
    contract_policy_id: String,
    resource_id: String,
}

impl ContractDescriptor {
    pub(crate) fn new(resource_id: &str, policy_id: &str) -> Self {
        Self {
            id: format!("contractdef-{resource_id}"),
            access_policy_id: policy_id.to_string(),
            contract_policy_id: policy_id.to_string(),
            resource_id: resource_id.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn access_policy_id(&self) -> &str {
        &self.access_policy_id
    }

    pub fn contract_policy_id(&self) -> &str {
        &self.contract_policy_id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Exact id match against a resource.
    pub fn governs(&self, resource: &ResourceDescriptor) -> bool {
        self.resource_id == resource.id()
    }
}
