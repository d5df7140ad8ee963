use jsonschema::{JSONSchema, ValidationError as SchemaValidationError};
use serde::{Deserialize, Serialize};

/// A JSONPath is a string that represents a path to a specific value within a JSON object.
///
/// For syntax details, see [https://identity.foundation/presentation-exchange/spec/v2.0.0/#jsonpath-syntax-definition](https://identity.foundation/presentation-exchange/spec/v2.0.0/#jsonpath-syntax-definition)
pub type JsonPath = String;

/// The only field path a credential constraint may select.
pub const CREDENTIAL_TYPE_PATH: &str = "$.type";

/// Input Descriptors describe the information a verifier requires of a holder.
///
/// Fields are kept optional on deserialization so a malformed definition can be
/// reported precisely by
/// [PresentationDefinition::credential_type_pattern](super::presentation_definition::PresentationDefinition::credential_type_pattern)
/// instead of as a generic parse failure.
///
/// See: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object](https://identity.foundation/presentation-exchange/spec/v2.0.0/#input-descriptor-object)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InputDescriptor {
    #[serde(default)]
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    constraints: Option<Constraints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
}

impl InputDescriptor {
    pub fn new(id: String, constraints: Constraints) -> Self {
        Self {
            id,
            constraints: Some(constraints),
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn constraints(&self) -> Option<&Constraints> {
        self.constraints.as_ref()
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    pub fn purpose(&self) -> Option<&String> {
        self.purpose.as_ref()
    }
}

/// Constraints a holder must satisfy to fulfill an [InputDescriptor].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<ConstraintsField>>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new field constraint to the constraints list.
    pub fn add_constraint(mut self, field: ConstraintsField) -> Self {
        self.fields.get_or_insert_with(Vec::new).push(field);
        self
    }

    pub fn fields(&self) -> Option<&[ConstraintsField]> {
        self.fields.as_deref()
    }
}

/// A single field constraint: a list of JSONPath expressions and a JSON Schema
/// filter applied to the values they select.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ConstraintsField {
    #[serde(default)]
    path: Vec<JsonPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

impl ConstraintsField {
    pub fn new(path: JsonPath) -> Self {
        Self {
            path: vec![path],
            ..Default::default()
        }
    }

    pub fn set_filter(mut self, filter: serde_json::Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn path(&self) -> &[JsonPath] {
        &self.path
    }

    pub fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    /// Return the raw filter of the constraints field.
    pub fn filter(&self) -> Option<&serde_json::Value> {
        self.filter.as_ref()
    }

    /// The `pattern` keyword of the filter, if it is a string.
    pub fn filter_pattern(&self) -> Option<&str> {
        self.filter
            .as_ref()
            .and_then(|filter| filter.get("pattern"))
            .and_then(serde_json::Value::as_str)
    }

    /// Return a JSON schema validator using the internal filter.
    ///
    /// If no filter is provided on the constraint field, this
    /// will return None.
    pub fn validator(&self) -> Option<Result<JSONSchema, SchemaValidationError>> {
        self.filter.as_ref().map(JSONSchema::compile)
    }
}
