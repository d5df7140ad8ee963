//! Access policies attached to compiled resources.
//!
//! A [PolicyDescriptor] holds zero or more [Constraint]s combined with AND
//! semantics. A descriptor without constraints grants unconditional access.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::debug;

use super::presentation_definition::{PresentationDefinition, ValidationError};

pub mod delegate;
pub mod evaluator;

/// Left operand of the authorization constraint in the policy document.
pub const AUTHORIZATION_CONSTRAINT_KEY: &str = "https://ctic.es/odrl/constraint/authorization";

/// Left operand of the credential type constraint in the policy document.
pub const CREDENTIAL_CONSTRAINT_KEY: &str = "hasVerifiableCredentialType";

const ODRL_USE_ACTION: &str = "use";

/// A regular expression tested against each entry of a credential's `type`.
///
/// The whole entry must match, as if the expression were anchored at both ends.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialTypePattern {
    pattern: String,
    regex: Regex,
}

impl CredentialTypePattern {
    pub fn new(pattern: &str) -> Result<Self, ValidationError> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            ValidationError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, credential_type: &str) -> bool {
        self.regex.is_match(credential_type)
    }
}

impl PartialEq for CredentialTypePattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for CredentialTypePattern {}

impl TryFrom<String> for CredentialTypePattern {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<CredentialTypePattern> for String {
    fn from(value: CredentialTypePattern) -> Self {
        value.pattern
    }
}

impl fmt::Display for CredentialTypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Constraint {
    /// The caller must be implicitly trusted or approved by the decision delegate.
    Authorization,
    /// The caller must present a credential whose type matches the pattern.
    CredentialType { pattern: CredentialTypePattern },
}

impl Constraint {
    fn left_operand(&self) -> &'static str {
        match self {
            Constraint::Authorization => AUTHORIZATION_CONSTRAINT_KEY,
            Constraint::CredentialType { .. } => CREDENTIAL_CONSTRAINT_KEY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDescriptor {
    id: String,
    #[serde(default)]
    constraints: Vec<Constraint>,
}

impl PolicyDescriptor {
    pub fn new(id: String, constraints: Vec<Constraint>) -> Self {
        Self { id, constraints }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn requires_authorization(&self) -> bool {
        self.constraints
            .iter()
            .any(|constraint| matches!(constraint, Constraint::Authorization))
    }

    pub fn credential_type_pattern(&self) -> Option<&CredentialTypePattern> {
        self.constraints.iter().find_map(|constraint| match constraint {
            Constraint::CredentialType { pattern } => Some(pattern),
            Constraint::Authorization => None,
        })
    }

    /// No constraints: access is granted unconditionally.
    pub fn is_unconditional(&self) -> bool {
        self.constraints.is_empty()
    }

    /// ODRL-style rendering of the policy, as forwarded to the decision delegate.
    pub fn to_policy_document(&self) -> Json {
        let permissions: Vec<Json> = self
            .constraints
            .iter()
            .map(|constraint| {
                let (operator, right_operand) = match constraint {
                    Constraint::Authorization => ("eq", "true".to_string()),
                    Constraint::CredentialType { pattern } => ("isPartOf", pattern.to_string()),
                };
                json!({
                    "action": ODRL_USE_ACTION,
                    "constraint": {
                        "leftOperand": constraint.left_operand(),
                        "operator": operator,
                        "rightOperand": right_operand,
                    }
                })
            })
            .collect();

        json!({
            "@id": self.id,
            "@type": "Set",
            "permission": permissions,
        })
    }
}

/// Compiles presentation definitions into [PolicyDescriptor]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyCompiler {
    authorization_enabled: bool,
}

impl PolicyCompiler {
    pub fn new(authorization_enabled: bool) -> Self {
        Self {
            authorization_enabled,
        }
    }

    /// Policy ids are derived from the resource id so recompiling the same
    /// document yields the same policies.
    pub fn policy_id(resource_id: &str) -> String {
        format!("policy-{resource_id}")
    }

    pub fn compile(
        &self,
        resource_id: &str,
        presentation_definition: Option<&PresentationDefinition>,
    ) -> Result<PolicyDescriptor, ValidationError> {
        let mut constraints = Vec::new();

        if self.authorization_enabled {
            debug!("enabling authorization constraint for {resource_id}");
            constraints.push(Constraint::Authorization);
        }

        if let Some(presentation_definition) = presentation_definition {
            let pattern =
                CredentialTypePattern::new(presentation_definition.credential_type_pattern()?)?;
            debug!("credential type constraint `{pattern}` for {resource_id}");
            constraints.push(Constraint::CredentialType { pattern });
        }

        Ok(PolicyDescriptor::new(
            Self::policy_id(resource_id),
            constraints,
        ))
    }
}
