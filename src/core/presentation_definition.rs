use super::input_descriptor::*;

use serde::{Deserialize, Serialize};

/// Operation extension key carrying a [PresentationDefinition].
pub const PRESENTATION_DEFINITION_EXTENSION: &str = "x-connector-presentation-definition";

/// A presentation definition is a JSON object that describes the information a [Verifier](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:verifier) requires of a [Holder](https://identity.foundation/presentation-exchange/spec/v2.0.0/#term:holder).
///
/// Only a narrow subset is understood: the first field of the first input
/// descriptor, which must select `$.type` and carry a `filter.pattern`. Anything
/// beyond that is accepted on parse and ignored.
///
/// For more information, see: [https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition](https://identity.foundation/presentation-exchange/spec/v2.0.0/#presentation-definition)
#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq)]
pub struct PresentationDefinition {
    #[serde(default)]
    id: String,
    #[serde(default)]
    input_descriptors: Vec<InputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
}

/// A presentation definition extension that cannot be compiled into a
/// credential constraint.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("presentation definition is not a valid object: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("presentation definition has no input_descriptors")]
    MissingInputDescriptors,

    #[error("input descriptor has no constraints")]
    MissingConstraints,

    #[error("input descriptor constraints have no fields")]
    MissingFields,

    #[error("constraint field has no path")]
    MissingPath,

    #[error("constraint field path must be `{CREDENTIAL_TYPE_PATH}`, found `{0}`")]
    UnsupportedPath(String),

    #[error("constraint field has no filter")]
    MissingFilter,

    #[error("constraint field filter has no string `pattern`")]
    MissingPattern,

    #[error("constraint field filter is not a valid JSON schema: {0}")]
    InvalidFilter(String),

    #[error("credential type pattern `{pattern}` is not a valid regular expression: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl PresentationDefinition {
    pub fn new(id: String, input_descriptor: InputDescriptor) -> Self {
        Self {
            id,
            input_descriptors: vec![input_descriptor],
            ..Default::default()
        }
    }

    /// Build the definition for the common case: credentials whose `type`
    /// matches `pattern`.
    pub fn for_credential_type(id: String, pattern: &str) -> Self {
        let field = ConstraintsField::new(CREDENTIAL_TYPE_PATH.to_string()).set_filter(
            serde_json::json!({
                "type": "string",
                "pattern": pattern,
            }),
        );
        Self::new(
            id.clone(),
            InputDescriptor::new(id, Constraints::new().add_constraint(field)),
        )
    }

    /// Parse the value of the [PRESENTATION_DEFINITION_EXTENSION] operation extension.
    pub fn from_extension(value: &serde_json::Value) -> Result<Self, ValidationError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn id(&self) -> &String {
        &self.id
    }

    pub fn input_descriptors(&self) -> &Vec<InputDescriptor> {
        &self.input_descriptors
    }

    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    pub fn purpose(&self) -> Option<&String> {
        self.purpose.as_ref()
    }

    /// The constraint field that is honoured: the first field of the first
    /// input descriptor.
    pub fn credential_type_field(&self) -> Result<&ConstraintsField, ValidationError> {
        let input_descriptor = self
            .input_descriptors
            .first()
            .ok_or(ValidationError::MissingInputDescriptors)?;

        let constraints = input_descriptor
            .constraints()
            .ok_or(ValidationError::MissingConstraints)?;

        let field = constraints
            .fields()
            .and_then(<[ConstraintsField]>::first)
            .ok_or(ValidationError::MissingFields)?;

        let path = field.path().first().ok_or(ValidationError::MissingPath)?;

        if path != CREDENTIAL_TYPE_PATH {
            return Err(ValidationError::UnsupportedPath(path.clone()));
        }

        Ok(field)
    }

    /// Extract the credential type pattern from the honoured field.
    pub fn credential_type_pattern(&self) -> Result<&str, ValidationError> {
        let field = self.credential_type_field()?;

        if field.filter().is_none() {
            return Err(ValidationError::MissingFilter);
        }

        if let Some(Err(e)) = field.validator() {
            return Err(ValidationError::InvalidFilter(e.to_string()));
        }

        field.filter_pattern().ok_or(ValidationError::MissingPattern)
    }
}
