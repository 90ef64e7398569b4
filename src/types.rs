//! Plan and metadata values exchanged between [`ProviderService`] and the
//! gRPC layer, plus the handshake constants.
//!
//! [`ProviderService`]: crate::ProviderService

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{has_errors, Diagnostic};

/// Handshake protocol version printed on startup.
pub const PROTOCOL_VERSION: u32 = 1;

/// First field of the handshake line: `HEMMER_PROVIDER|<version>|<addr>`.
pub const HANDSHAKE_PREFIX: &str = "HEMMER_PROVIDER";

/// Environment variable the host reads to attach to debug-mode providers.
pub const REATTACH_ENV_VAR: &str = "HEMMER_REATTACH_PROVIDERS";

/// One attribute that differs between prior and planned state.
///
/// `before` is `None` for an attribute being set for the first time, `after`
/// is `None` for one being removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name, e.g. `partitions`.
    pub path: String,
    /// Prior value.
    pub before: Option<Value>,
    /// Planned value.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// An attribute that gains a value.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: None,
            after: Some(value),
        }
    }

    /// An attribute that loses its value.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(value),
            after: None,
        }
    }

    /// An attribute whose value changes from `before` to `after`.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self {
            path: path.into(),
            before: Some(before),
            after: Some(after),
        }
    }
}

/// Missing values travel as empty bytes.
fn value_bytes(value: Option<Value>) -> Vec<u8> {
    value
        .and_then(|v| serde_json::to_vec(&v).ok())
        .unwrap_or_default()
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: value_bytes(change.before),
            after: value_bytes(change.after),
        }
    }
}

/// Outcome of planning a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// State the resource will have once the plan is applied. `Null` when
    /// the resource is being destroyed.
    pub planned_state: Value,
    /// Attribute differences, sorted by path.
    pub changes: Vec<AttributeChange>,
    /// Set when a force-new attribute changed: the host deletes and
    /// recreates instead of updating in place.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Nothing to do; `state` is kept as is.
    pub fn no_change(state: Value) -> Self {
        Self::with_changes(state, Vec::new(), false)
    }

    /// A plan that moves the resource to `planned_state`.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether applying the plan would change anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// State returned by Create, Read, Update or ReadDataSource, together with
/// whatever the handler reported.
///
/// State may accompany error diagnostics. A create that made the topic but
/// failed to read it back still carries the new id, so the host keeps
/// tracking an object that exists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateResult {
    /// State to record; `None` leaves the host with nothing.
    pub state: Option<Value>,
    /// Warnings on success, errors on failure.
    pub diagnostics: Vec<Diagnostic>,
}

impl StateResult {
    /// Successful result with no diagnostics.
    pub fn new(state: Value) -> Self {
        Self::with_diagnostics(Some(state), Vec::new())
    }

    pub fn with_diagnostics(state: Option<Value>, diagnostics: Vec<Diagnostic>) -> Self {
        Self { state, diagnostics }
    }

    /// Whether any diagnostic is an error.
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    /// The state, or the error diagnostics when there are any. Warnings and
    /// partial state are dropped.
    pub fn into_result(self) -> Result<Value, ProviderError> {
        if self.has_errors() {
            return Err(ProviderError::Diagnostics(self.diagnostics));
        }
        Ok(self.state.unwrap_or(Value::Null))
    }
}

/// Type names served by a provider, answered from GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names, sorted.
    pub resources: Vec<String>,
    /// Data source type names, sorted.
    pub data_sources: Vec<String>,
    /// Optional protocol features.
    pub capabilities: ServerCapabilities,
}

/// Optional protocol features a provider implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Plan accepts a null proposed state and returns a destroy plan.
    pub plan_destroy: bool,
}

/// Connection details a host needs to attach to a provider started in debug mode.
///
/// Serialized as the value of [`REATTACH_ENV_VAR`], keyed by provider address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReattachConfig {
    /// Wire protocol, always `grpc`.
    pub protocol: String,
    /// Provider protocol version.
    pub protocol_version: u32,
    /// Process id of the running provider.
    pub pid: u32,
    /// Address the gRPC server listens on.
    pub address: String,
}

impl ReattachConfig {
    /// Describe a provider listening on `address` in the current process.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            protocol: "grpc".to_string(),
            protocol_version: PROTOCOL_VERSION,
            pid: std::process::id(),
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_kinds() {
        let added = AttributeChange::added("name", json!("orders"));
        assert_eq!((added.before, added.after), (None, Some(json!("orders"))));

        let removed = AttributeChange::removed("name", json!("orders"));
        assert_eq!((removed.before, removed.after), (Some(json!("orders")), None));

        let modified = AttributeChange::modified("partitions", json!(1), json!(2));
        assert_eq!(modified.before, Some(json!(1)));
        assert_eq!(modified.after, Some(json!(2)));
    }

    #[test]
    fn test_change_to_proto_encodes_missing_as_empty() {
        let proto: crate::generated::AttributeChange =
            AttributeChange::added("partitions", json!(3)).into();

        assert_eq!(proto.path, "partitions");
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"3".to_vec());
    }

    #[test]
    fn test_plan_result() {
        let unchanged = PlanResult::no_change(json!({"id": "123"}));
        assert!(!unchanged.has_changes());
        assert!(!unchanged.requires_replace);

        let replace = PlanResult::with_changes(
            json!({"id": null, "partitions": 6}),
            vec![AttributeChange::modified("partitions", json!(3), json!(6))],
            true,
        );
        assert!(replace.has_changes());
        assert!(replace.requires_replace);
    }

    #[test]
    fn test_state_result_into_result() {
        let ok = StateResult::with_diagnostics(
            Some(json!({"id": "1"})),
            vec![Diagnostic::warning("slow broker")],
        );
        assert!(!ok.has_errors());
        assert_eq!(ok.into_result().unwrap(), json!({"id": "1"}));

        let partial = StateResult::with_diagnostics(
            Some(json!({"id": "1"})),
            vec![Diagnostic::error("read failed")],
        );
        let err = partial.into_result().unwrap_err();
        assert_eq!(err.into_diagnostics()[0].summary, "read failed");

        assert_eq!(StateResult::default().into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_reattach_config() {
        let config = ReattachConfig::new("127.0.0.1:4000");
        assert_eq!(config.protocol, "grpc");
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
        assert_eq!(config.pid, std::process::id());

        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(encoded["address"], "127.0.0.1:4000");
    }

    #[test]
    fn test_handshake_line_fields() {
        let line = format!("{}|{}|127.0.0.1:1", HANDSHAKE_PREFIX, PROTOCOL_VERSION);
        assert_eq!(line, "HEMMER_PROVIDER|1|127.0.0.1:1");
        assert_eq!(REATTACH_ENV_VAR, "HEMMER_REATTACH_PROVIDERS");
    }
}
