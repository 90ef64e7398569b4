//! Attribute schemas and diagnostics.
//!
//! A [`Schema`] lists the attributes of the provider configuration, of a
//! resource or of a data source. The same value drives config validation,
//! plan diffs (force-new and computed attributes) and the `GetSchema`
//! response.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;

/// Value type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// JSON string.
    String,
    /// JSON integer.
    Int64,
    /// JSON array whose elements all have the inner type.
    List(Box<AttributeType>),
}

impl AttributeType {
    /// `list(element_type)`.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }
}

/// Who sets an attribute: the user, the provider, or either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// Must be present in configuration.
    pub required: bool,
    /// May be present in configuration.
    pub optional: bool,
    /// Filled in by the provider.
    pub computed: bool,
}

impl AttributeFlags {
    /// Set by the user.
    pub fn required() -> Self {
        Self {
            required: true,
            optional: false,
            computed: false,
        }
    }

    /// Set by the provider only.
    pub fn computed() -> Self {
        Self {
            required: false,
            optional: false,
            computed: true,
        }
    }

    /// Set by the user or, when left out, by the provider.
    pub fn optional_computed() -> Self {
        Self {
            required: false,
            optional: true,
            computed: true,
        }
    }

    /// Whether the provider alone sets this attribute.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// One attribute of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Required / optional / computed.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Text shown to users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A change to this attribute cannot be applied in place; the resource
    /// is deleted and created again.
    #[serde(default)]
    pub force_new: bool,
    /// Smallest accepted value for an int64 attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    /// Environment variable consulted when the attribute is absent from configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_default: Option<String>,
}

impl Attribute {
    /// Attribute of type `attr_type` with no description or constraints.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            min_value: None,
            env_default: None,
        }
    }

    /// `string`, required.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// `string`, computed.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// `string`, optional and computed.
    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    /// `int64`, required.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// `int64`, computed.
    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    /// `list(string)`, required.
    pub fn required_string_list() -> Self {
        Self::new(
            AttributeType::list(AttributeType::String),
            AttributeFlags::required(),
        )
    }

    /// Attach user-facing text.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..self
        }
    }

    /// Changing the attribute replaces the resource.
    pub fn with_force_new(self) -> Self {
        Self {
            force_new: true,
            ..self
        }
    }

    /// Reject int64 values below `min`.
    pub fn with_min_value(self, min: i64) -> Self {
        Self {
            min_value: Some(min),
            ..self
        }
    }

    /// Default the attribute from an environment variable when unset.
    pub fn with_env_default(self, var: impl Into<String>) -> Self {
        Self {
            env_default: Some(var.into()),
            ..self
        }
    }
}

/// Attributes of a schema, keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Block {
    /// Attribute definitions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    /// Text shown to users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Schema for the provider configuration, a resource or a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Schema {
    /// State version. Every schema in this provider is at version 0.
    #[serde(default)]
    pub version: u64,
    /// Top-level attributes.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// Empty schema at version 0.
    pub fn v0() -> Self {
        Self::default()
    }

    /// Add (or replace) the attribute `name`.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Attach user-facing text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.block.description = Some(description.into());
        self
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.get(name)
    }

    /// Attribute names in sorted order.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.block.attributes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Everything a provider serves, as returned by `GetSchema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderSchema {
    /// Provider configuration (`bootstrap_servers`).
    #[serde(default)]
    pub provider: Schema,
    /// Resource schemas by type name.
    #[serde(default)]
    pub resources: HashMap<String, Schema>,
    /// Data source schemas by type name.
    #[serde(default)]
    pub data_sources: HashMap<String, Schema>,
}

impl ProviderSchema {
    /// No configuration, resources or data sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the provider configuration schema.
    pub fn with_provider_config(self, provider: Schema) -> Self {
        Self { provider, ..self }
    }

    /// Register a resource type.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Register a data source type.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

/// How serious a [`Diagnostic`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// The operation failed.
    Error,
    /// The operation succeeded but the user should look at something.
    Warning,
}

/// A problem reported back to the host, optionally tied to an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: DiagnosticSeverity,
    /// One-line message.
    pub summary: String,
    /// Longer explanation, e.g. the broker's message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Attribute path, e.g. `partitions` or `bootstrap_servers.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn with_severity(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Error, summary)
    }

    /// Warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, summary)
    }

    /// Error diagnostic whose summary is the error's message.
    pub fn from_error(err: impl Display) -> Self {
        Self::error(err.to_string())
    }

    /// Attach a longer explanation.
    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..self
        }
    }

    /// Point the diagnostic at an attribute.
    pub fn with_attribute(self, attribute: impl Into<String>) -> Self {
        Self {
            attribute: Some(attribute.into()),
            ..self
        }
    }

    /// Whether this diagnostic fails the operation.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Whether any diagnostic in the list is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
