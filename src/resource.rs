//! The per-kind lifecycle contracts and the state they operate on.
//!
//! A resource kind implements [`Resource`], a data source kind implements
//! [`DataSource`]. Each lifecycle method receives the configured
//! [`KafkaClient`] explicitly and mutates a [`ResourceData`] in place,
//! returning the diagnostics it produced. An empty identifier after the call
//! means the object does not exist.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::KafkaClient;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};

const ID_KEY: &str = "id";

/// Attribute values of one resource or data source instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    id: String,
    attributes: Map<String, Value>,
}

impl ResourceData {
    /// Create empty data with no identifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a state object sent by the host.
    ///
    /// A missing or null `id` becomes the empty identifier.
    pub fn from_state(state: Value) -> Result<Self, ProviderError> {
        let mut attributes = match state {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ProviderError::Validation(format!(
                    "expected state object, got {}",
                    other
                )))
            },
        };

        let id = match attributes.remove(ID_KEY) {
            Some(Value::String(id)) => id,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Ok(Self { id, attributes })
    }

    /// Render as the state object returned to the host.
    pub fn into_state(self) -> Value {
        let mut attributes = self.attributes;
        attributes.insert(ID_KEY.to_string(), Value::String(self.id));
        Value::Object(attributes)
    }

    /// The identifier; empty when the object does not exist.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set the identifier. The empty string marks the object as gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Raw attribute value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// String attribute, or the empty string when unset.
    pub fn get_str(&self, key: &str) -> &str {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Integer attribute, or zero when unset.
    ///
    /// Whole floats such as `3.0` are accepted.
    pub fn get_i64(&self, key: &str) -> i64 {
        self.attributes
            .get(key)
            .and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            })
            .unwrap_or_default()
    }

    /// Set an attribute value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }
}

/// Lifecycle operations of a managed resource kind.
#[async_trait]
pub trait Resource: Send + Sync {
    /// The resource schema.
    fn schema(&self) -> Schema;

    /// Create the object described by `data` and populate observed attributes.
    async fn create(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic>;

    /// Refresh `data` from the broker.
    async fn read(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic>;

    /// Bring the object in line with `data`.
    async fn update(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic>;

    /// Remove the object.
    async fn delete(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic>;
}

/// The read operation of a data source kind.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The data source schema.
    fn schema(&self) -> Schema;

    /// Populate `data` from the broker.
    async fn read(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic>;
}
