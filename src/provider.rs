//! The Kafka provider: configuration plus the `kafka_topic` resource and data
//! source, dispatched by type name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::client::KafkaClient;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::resource::{DataSource, Resource, ResourceData};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::topic::{TopicDataSource, TopicResource, TOPIC_TYPE};
use crate::types::{PlanResult, StateResult};
use crate::validation::validate;

/// Registry address the provider is published under.
pub const PROVIDER_ADDRESS: &str = "registry.hemmer.io/hemmer-io/kafka";

const ID_KEY: &str = "id";

/// Turn handler diagnostics into a result. Warnings alone are success.
fn check(diagnostics: Vec<Diagnostic>) -> Result<(), ProviderError> {
    if has_errors(&diagnostics) {
        Err(ProviderError::Diagnostics(diagnostics))
    } else {
        Ok(())
    }
}

/// Package handler output. After errors the state is kept only if `keep`.
fn settle(data: ResourceData, diagnostics: Vec<Diagnostic>, keep: bool) -> StateResult {
    let state = (keep || !has_errors(&diagnostics)).then(|| data.into_state());
    StateResult::with_diagnostics(state, diagnostics)
}

/// Provider exposing Kafka topics.
pub struct KafkaProvider {
    broker: Arc<dyn Broker>,
    client: RwLock<Option<KafkaClient>>,
    resources: HashMap<&'static str, Box<dyn Resource>>,
    data_sources: HashMap<&'static str, Box<dyn DataSource>>,
}

impl KafkaProvider {
    /// Create an unconfigured provider that reaches Kafka through `broker`.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        let mut resources: HashMap<&'static str, Box<dyn Resource>> = HashMap::new();
        resources.insert(TOPIC_TYPE, Box::new(TopicResource));

        let mut data_sources: HashMap<&'static str, Box<dyn DataSource>> = HashMap::new();
        data_sources.insert(TOPIC_TYPE, Box::new(TopicDataSource));

        Self {
            broker,
            client: RwLock::new(None),
            resources,
            data_sources,
        }
    }

    /// The client stored by the last successful `configure`.
    pub async fn client(&self) -> Option<KafkaClient> {
        self.client.read().await.clone()
    }

    async fn configured_client(&self) -> Result<KafkaClient, ProviderError> {
        self.client().await.ok_or_else(|| {
            ProviderError::NotConfigured("Configure must succeed before any topic operation".into())
        })
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(data_source_type)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    async fn connect(&self, config: Value) -> Result<KafkaClient, ProviderError> {
        let config = ProviderConfig::from_value(config)?;
        let addr = config.resolve().await?;
        Ok(KafkaClient::new(addr, Arc::clone(&self.broker)))
    }
}

impl std::fmt::Debug for KafkaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProvider")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ProviderService for KafkaProvider {
    fn schema(&self) -> ProviderSchema {
        let schema = ProviderSchema::new().with_provider_config(ProviderConfig::schema());
        let schema = self
            .resources
            .iter()
            .fold(schema, |s, (name, r)| s.with_resource(*name, r.schema()));
        self.data_sources
            .iter()
            .fold(schema, |s, (name, d)| s.with_data_source(*name, d.schema()))
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        Ok(match ProviderConfig::from_value(config) {
            Ok(_) => diagnostics,
            Err(e) => e.into_diagnostics(),
        })
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let client = match self.connect(config).await {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Provider configuration failed");
                return Ok(e.into_diagnostics());
            },
        };

        info!(addr = %client.addr(), "Provider configured");
        *self.client.write().await = Some(client);
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.client.write().await.take();
        debug!("Provider stopped");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        Ok(validate(&resource.schema(), &config))
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        Ok(plan_resource(
            &resource.schema(),
            prior_state.as_ref(),
            &proposed_state,
        ))
    }

    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<StateResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client().await?;
        let mut data = ResourceData::from_state(planned_state)?;

        let diagnostics = resource.create(&client, &mut data).await;
        // An id means the topic exists, whatever failed after it was made.
        let created = !data.id().is_empty();
        if created && has_errors(&diagnostics) {
            warn!(id = data.id(), "Created with errors, returning partial state");
        }
        Ok(settle(data, diagnostics, created))
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<StateResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client().await?;
        let mut data = ResourceData::from_state(current_state)?;

        let diagnostics = resource.read(&client, &mut data).await;
        Ok(settle(data, diagnostics, false))
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<StateResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client().await?;
        // Delete and create both act on the planned values.
        let mut data = ResourceData::from_state(planned_state)?;
        if data.id().is_empty() {
            if let Some(id) = prior_state.get(ID_KEY).and_then(Value::as_str) {
                data.set_id(id);
            }
        }

        // The id reflects what exists: the old topic if the delete request failed,
        // nothing if create failed, the new topic otherwise.
        let diagnostics = resource.update(&client, &mut data).await;
        Ok(settle(data, diagnostics, true))
    }

    async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.configured_client().await?;
        let mut data = ResourceData::from_state(current_state)?;

        let diagnostics = resource.delete(&client, &mut data).await;
        debug!(id = data.id(), "Delete finished");
        check(diagnostics)
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        Ok(validate(&data_source.schema(), &config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<StateResult, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        let client = self.configured_client().await?;
        let mut data = ResourceData::from_state(config)?;

        let diagnostics = data_source.read(&client, &mut data).await;
        Ok(settle(data, diagnostics, false))
    }
}
