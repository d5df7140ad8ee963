//! The subset of an OpenAPI 3.x document the compiler reads.
//!
//! Everything not modelled here is ignored. Operation-level `x-*` extensions
//! are kept verbatim. Local `#/components/...` references to request bodies
//! and path items are followed; other references are not.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::compiler::SchemaError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenApiDocument {
    pub openapi: String,
    #[serde(default)]
    pub info: Info,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub paths: BTreeMap<String, PathItem>,
    #[serde(default, skip_serializing_if = "Components::is_empty")]
    pub components: Components,
}

/// Reusable objects that request bodies and path items may point at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request_bodies: BTreeMap<String, RefOr<RequestBody>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_items: BTreeMap<String, PathItem>,
}

impl Components {
    pub fn is_empty(&self) -> bool {
        self.request_bodies.is_empty() && self.path_items.is_empty()
    }
}

/// Either an inline object or a `$ref` to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefOr<T> {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Item(T),
}

/// References followed before giving up on a cycle.
const MAX_REFERENCE_DEPTH: usize = 16;

/// Name of the `kind` component a local reference points at, with JSON pointer
/// escapes undone.
fn component_name(reference: &str, kind: &str) -> Option<String> {
    let name = reference
        .strip_prefix("#/components/")?
        .strip_prefix(kind)?
        .strip_prefix('/')?;
    Some(name.replace("~1", "/").replace("~0", "~"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, ServerVariable>,
}

impl Server {
    /// The url with every `{name}` placeholder replaced by the variable's
    /// default. Undeclared variables, or variables without a default, become
    /// the empty string.
    pub fn resolved_url(&self) -> String {
        let mut resolved = String::with_capacity(self.url.len());
        let mut rest = self.url.as_str();

        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            resolved.push_str(&rest[..start]);
            let name = &rest[start + 1..start + len];
            if let Some(default) = self
                .variables
                .get(name)
                .and_then(|variable| variable.default.as_deref())
            {
                resolved.push_str(default);
            }
            rest = &rest[start + len + 1..];
        }

        resolved.push_str(rest);
        resolved
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathItem {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Operation>,
}

impl PathItem {
    /// Declared operations with their upper-case method.
    pub fn operations(&self) -> impl Iterator<Item = (&'static str, &Operation)> {
        [
            ("GET", &self.get),
            ("PUT", &self.put),
            ("POST", &self.post),
            ("DELETE", &self.delete),
            ("OPTIONS", &self.options),
            ("HEAD", &self.head),
            ("PATCH", &self.patch),
            ("TRACE", &self.trace),
        ]
        .into_iter()
        .filter_map(|(method, operation)| operation.as_ref().map(|operation| (method, operation)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RefOr<RequestBody>>,
    /// Remaining members, including `x-*` extensions.
    #[serde(flatten)]
    pub other: Map<String, Json>,
}

impl Operation {
    pub fn extension(&self, name: &str) -> Option<&Json> {
        if !name.starts_with("x-") {
            return None;
        }
        self.other.get(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Media types in declaration order.
    #[serde(default)]
    pub content: Map<String, Json>,
    #[serde(default)]
    pub required: bool,
}

impl RequestBody {
    pub fn media_types(&self) -> impl Iterator<Item = &str> {
        self.content.keys().map(String::as_str)
    }
}

impl OpenApiDocument {
    /// The request body `body` stands for, following local references.
    pub fn request_body<'a>(
        &'a self,
        mut body: &'a RefOr<RequestBody>,
    ) -> Result<&'a RequestBody, SchemaError> {
        let mut followed = "";
        for _ in 0..MAX_REFERENCE_DEPTH {
            let reference = match body {
                RefOr::Item(body) => return Ok(body),
                RefOr::Ref { reference } => reference,
            };
            body = component_name(reference, "requestBodies")
                .and_then(|name| self.components.request_bodies.get(&name))
                .ok_or_else(|| SchemaError::UnresolvedReference(reference.clone()))?;
            followed = reference;
        }
        Err(SchemaError::ReferenceCycle(followed.to_string()))
    }

    /// The path item `item` stands for, following a local `$ref`.
    pub fn path_item<'a>(&'a self, mut item: &'a PathItem) -> Result<&'a PathItem, SchemaError> {
        let mut followed = "";
        for _ in 0..MAX_REFERENCE_DEPTH {
            let Some(reference) = &item.reference else {
                return Ok(item);
            };
            item = component_name(reference, "pathItems")
                .and_then(|name| self.components.path_items.get(&name))
                .ok_or_else(|| SchemaError::UnresolvedReference(reference.clone()))?;
            followed = reference;
        }
        Err(SchemaError::ReferenceCycle(followed.to_string()))
    }

    /// Parse a JSON or YAML document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SchemaError> {
        let looks_like_json = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');

        let document: Self = if looks_like_json {
            serde_json::from_slice(bytes).map_err(|e| SchemaError::Unparsable(e.to_string()))?
        } else {
            serde_yaml::from_slice(bytes).map_err(|e| SchemaError::Unparsable(e.to_string()))?
        };

        if !document.openapi.starts_with("3.") {
            return Err(SchemaError::UnsupportedVersion(document.openapi));
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_variables_use_defaults_or_empty() {
        let server: Server = serde_json::from_value(serde_json::json!({
            "url": "{scheme}://api.example.com:{port}/{basePath}",
            "variables": {
                "scheme": { "default": "https", "enum": ["http", "https"] },
                "port": { "default": "8443" }
            }
        }))
        .unwrap();
        assert_eq!(server.resolved_url(), "https://api.example.com:8443/");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        let server = Server {
            url: "http://host/{oops".into(),
            ..Default::default()
        };
        assert_eq!(server.resolved_url(), "http://host/{oops");
    }

    #[test]
    fn parses_yaml_with_extensions_in_order() {
        let document = OpenApiDocument::from_slice(
            br#"
openapi: 3.0.3
info: { title: Meters, version: "1.0" }
paths:
  /upload:
    post:
      operationId: upload
      x-connector-presentation-definition: { id: pd }
      requestBody:
        content:
          text/csv: {}
          multipart/form-data: {}
      responses: { "200": { description: ok } }
"#,
        )
        .unwrap();

        let (method, operation) = document.paths["/upload"].operations().next().unwrap();
        assert_eq!(method, "POST");
        let body = document
            .request_body(operation.request_body.as_ref().unwrap())
            .unwrap();
        assert_eq!(
            body.media_types().collect::<Vec<_>>(),
            vec!["text/csv", "multipart/form-data"]
        );
        assert!(operation
            .extension("x-connector-presentation-definition")
            .is_some());
        assert!(operation.extension("responses").is_none());
    }

    #[test]
    fn rejects_swagger_2_and_garbage() {
        assert!(matches!(
            OpenApiDocument::from_slice(br#"{"swagger": "2.0", "openapi": "2.0"}"#),
            Err(SchemaError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            OpenApiDocument::from_slice(b"{ not json"),
            Err(SchemaError::Unparsable(_))
        ));
    }

    #[test]
    fn follows_component_references() {
        let document = OpenApiDocument::from_slice(
            br##"
openapi: 3.1.0
paths:
  /upload:
    $ref: "#/components/pathItems/Upload"
components:
  pathItems:
    Upload:
      post:
        requestBody: { $ref: "#/components/requestBodies/Export" }
  requestBodies:
    Export: { $ref: "#/components/requestBodies/Multipart" }
    Multipart:
      content:
        multipart/form-data: {}
    Loop: { $ref: "#/components/requestBodies/Loop" }
"##,
        )
        .unwrap();

        let item = document.path_item(&document.paths["/upload"]).unwrap();
        let (_, operation) = item.operations().next().unwrap();
        let body = document
            .request_body(operation.request_body.as_ref().unwrap())
            .unwrap();
        assert_eq!(body.media_types().collect::<Vec<_>>(), vec!["multipart/form-data"]);

        let missing = RefOr::Ref {
            reference: "#/components/requestBodies/Nope".into(),
        };
        assert!(matches!(
            document.request_body(&missing),
            Err(SchemaError::UnresolvedReference(_))
        ));

        let external = RefOr::Ref {
            reference: "bodies.yaml#/Upload".into(),
        };
        assert!(matches!(
            document.request_body(&external),
            Err(SchemaError::UnresolvedReference(_))
        ));

        let looping = RefOr::Ref {
            reference: "#/components/requestBodies/Loop".into(),
        };
        assert!(matches!(
            document.request_body(&looping),
            Err(SchemaError::ReferenceCycle(_))
        ));
    }
}
