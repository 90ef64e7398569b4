//! Config validation against a [`Schema`].
//!
//! Runs before any handler sees a configuration, so malformed input comes
//! back as diagnostics pointing at the offending attribute instead of
//! reaching the broker.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_kafka::schema::{Schema, Attribute};
//! use hemmer_provider_kafka::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("partitions", Attribute::required_int64().with_min_value(1));
//!
//! let diagnostics = validate(&schema, &json!({"name": "orders", "partitions": 3}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "orders", "partitions": 0}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("partitions".to_string()));
//! ```

use serde_json::{Map, Value};

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};

/// Check `config` against `schema`. An empty result means the config is valid.
///
/// - a required attribute must be present and non-null, unless its
///   environment default is set to a non-empty value
/// - computed-only attributes are ignored
/// - present values must match the attribute type; lists are checked per
///   element (`bootstrap_servers.1`)
/// - int64 values must honour the attribute's minimum
///
/// Diagnostics are ordered by attribute name.
pub fn validate(schema: &Schema, config: &Value) -> Vec<Diagnostic> {
    let empty = Map::new();
    let object = match config {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return vec![Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", kind(other)))]
        },
    };

    let mut checker = Checker::default();
    for name in schema.attribute_names() {
        if let Some(attr) = schema.attribute(name) {
            checker.attribute(name, attr, object.get(name));
        }
    }
    checker.diagnostics
}

/// [`validate`], as a `Result`.
pub fn validate_result(schema: &Schema, config: &Value) -> Result<(), Vec<Diagnostic>> {
    match validate(schema, config) {
        diagnostics if diagnostics.is_empty() => Ok(()),
        diagnostics => Err(diagnostics),
    }
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<Diagnostic>,
}

impl Checker {
    fn attribute(&mut self, path: &str, attr: &Attribute, value: Option<&Value>) {
        if attr.flags.is_computed_only() {
            return;
        }

        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => {
                if attr.flags.required && !env_default_set(attr) {
                    self.fail(
                        path,
                        format!("Missing required attribute '{}'", path),
                        "This attribute is required and must be provided",
                    );
                }
                return;
            },
        };

        self.value(path, &attr.attr_type, value);
        if let (Some(min), Some(n)) = (attr.min_value, as_int64(value)) {
            if n < min {
                self.fail(
                    path,
                    format!("Invalid value for attribute '{}'", path),
                    format!("Expected at least {}, got {}", min, n),
                );
            }
        }
    }

    fn value(&mut self, path: &str, attr_type: &AttributeType, value: &Value) {
        let expected = match attr_type {
            AttributeType::String if value.is_string() => return,
            AttributeType::Int64 if as_int64(value).is_some() => return,
            AttributeType::List(element) => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.value(&format!("{}.{}", path, i), element, item);
                    }
                    return;
                },
                None => "list",
            },
            AttributeType::String => "string",
            AttributeType::Int64 => "int64",
        };

        self.fail(
            path,
            format!("Invalid type for attribute '{}'", path),
            format!("Expected {}, got {}", expected, kind(value)),
        );
    }

    fn fail(&mut self, path: &str, summary: String, detail: impl Into<String>) {
        self.diagnostics.push(
            Diagnostic::error(summary)
                .with_detail(detail)
                .with_attribute(path),
        );
    }
}

fn env_default_set(attr: &Attribute) -> bool {
    attr.env_default
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .is_some_and(|v| !v.is_empty())
}

/// Integer value, accepting whole floats such as `3.0`.
fn as_int64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
