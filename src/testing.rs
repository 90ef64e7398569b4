//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] without a gRPC server and
//! [`InMemoryBroker`] stands in for a Kafka cluster.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_kafka::testing::{InMemoryBroker, ProviderTester};
//! use hemmer_provider_kafka::KafkaProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_topic() {
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let tester = ProviderTester::new(KafkaProvider::new(broker.clone()));
//!
//!     tester
//!         .configure(json!({"bootstrap_servers": ["127.0.0.1:9092"]}))
//!         .await
//!         .unwrap();
//!
//!     let state = tester
//!         .create("kafka_topic", json!({"name": "orders", "partitions": 3, "replication_factor": 2}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(state["partitions"], 3);
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::broker::{
    Broker, BrokerConnection, BrokerError, PartitionMetadata, TopicError, TopicSpec,
};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::PlanResult;

/// Drives a [`ProviderService`] directly, without a gRPC server.
///
/// Validation and configuration calls turn error diagnostics into
/// [`TestError::Diagnostics`]. State-returning calls go through
/// [`into_result`](crate::types::StateResult::into_result), so error
/// diagnostics come back as [`ProviderError::Diagnostics`]; use
/// [`provider`](Self::provider) to see partial state. Plans use the
/// proposed state as the configuration.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// [`ProviderService::schema`].
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Data source type names, sorted.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate a provider configuration; error diagnostics become `Err`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.validate_provider_config(config).await?)
    }

    /// Configure the provider; error diagnostics become `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.configure(config).await?)
    }

    /// [`ProviderService::stop`].
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration; error diagnostics become `Err`.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        errors_only(
            self.provider
                .validate_resource_config(resource_type, config)
                .await?,
        )
    }

    /// Plan with no prior state.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.plan(resource_type, None, config).await
    }

    /// Plan `prior_state` towards `config`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.plan(resource_type, Some(prior_state), config).await
    }

    /// Plan the destruction of `prior_state`.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.plan(resource_type, Some(prior_state), Value::Null).await
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, prior_state, config.clone(), config)
            .await
    }

    /// [`ProviderService::create`].
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .create(resource_type, planned_state)
            .await?
            .into_result()
    }

    /// [`ProviderService::read`].
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read(resource_type, current_state)
            .await?
            .into_result()
    }

    /// [`ProviderService::update`].
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await?
            .into_result()
    }

    /// [`ProviderService::delete`].
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Validate a data source configuration; error diagnostics become `Err`.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        errors_only(
            self.provider
                .validate_data_source_config(data_source_type, config)
                .await?,
        )
    }

    /// [`ProviderService::read_data_source`].
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await?
            .into_result()
    }

    /// Plan, create, then read back. Returns the state from the read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let state = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, state).await
    }

    /// Plan, update, then read back. Returns the state from the read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let state = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, state).await
    }

    /// Plan the destroy, then delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone()).await?;
        self.delete(resource_type, current_state).await
    }

    /// [`lifecycle_create`](Self::lifecycle_create) with `initial`,
    /// [`lifecycle_update`](Self::lifecycle_update) to `updated`, then
    /// [`lifecycle_delete`](Self::lifecycle_delete). Returns the updated state.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial: Value,
        updated: Value,
    ) -> Result<Value, ProviderError> {
        let state = self.lifecycle_create(resource_type, initial).await?;
        let state = self.lifecycle_update(resource_type, state, updated).await?;
        self.lifecycle_delete(resource_type, state.clone()).await?;
        Ok(state)
    }
}

/// Failure of a [`ProviderTester`] validation or configuration call.
#[derive(Debug)]
pub enum TestError {
    /// The call returned error diagnostics (warnings are dropped).
    Diagnostics(Vec<Diagnostic>),
    /// The call itself failed.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let diagnostics = match self {
            TestError::Provider(e) => return write!(f, "Provider error: {}", e),
            TestError::Diagnostics(diagnostics) => diagnostics,
        };

        writeln!(f, "{} error diagnostic(s):", diagnostics.len())?;
        for d in diagnostics {
            write!(f, "  {}", d.summary)?;
            if let Some(detail) = &d.detail {
                write!(f, ": {}", detail)?;
            }
            if let Some(attribute) = &d.attribute {
                write!(f, " (at {})", attribute)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn errors_only(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<Diagnostic> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

fn summaries<'a>(diagnostics: impl Iterator<Item = &'a Diagnostic>) -> Vec<&'a str> {
    diagnostics.map(|d| d.summary.as_str()).collect()
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// Panics unless `plan` is a create: some changes, no replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(plan.has_changes(), "Expected a create plan, got no changes");
    assert!(!plan.requires_replace, "Expected a create plan, got a replacement");
}

/// Panics if `plan` has any change.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        !plan.has_changes(),
        "Expected no changes, got changes to {:?}",
        changed_paths(plan)
    );
}

/// Panics unless `plan` requires replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected a replacement, changes were {:?}",
        changed_paths(plan)
    );
}

/// Panics unless `plan` changes the attribute at `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let changed = changed_paths(plan);
    assert!(
        changed.contains(&path),
        "Expected '{}' to change, changed attributes were {:?}",
        path,
        changed
    );
}

/// Panics if `diagnostics` contains an error.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors = summaries(diagnostics.iter().filter(|d| d.is_error()));
    assert!(errors.is_empty(), "Expected no errors, got {:?}", errors);
}

/// Panics unless some error diagnostic's summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let errors = summaries(diagnostics.iter().filter(|d| d.is_error()));
    assert!(
        errors.iter().any(|s| s.contains(substring)),
        "Expected an error containing '{}', got {:?}",
        substring,
        errors
    );
}

// =========================================================================
// In-memory broker
// =========================================================================

/// A call made against an [`InMemoryBroker`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    /// A connection was opened to the address.
    Dial(SocketAddr),
    /// Partitions were listed for these topics (empty means all).
    ReadPartitions(Vec<String>),
    /// A create-topics request.
    CreateTopics(Vec<TopicSpec>),
    /// A delete-topics request.
    DeleteTopics(Vec<String>),
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, Vec<PartitionMetadata>>,
    create_errors: VecDeque<String>,
    delete_errors: VecDeque<String>,
    unreachable: bool,
    refuse_dials: bool,
    calls: Vec<BrokerCall>,
}

/// A [`Broker`] that keeps topics in memory.
///
/// Mirrors the broker messages for the common failures (topic exists, unknown
/// topic, replication factor above the broker count) and lets tests queue
/// per-topic errors, make every request fail to connect, or refuse only the
/// metadata connections.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    broker_ids: Vec<i32>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// A cluster of three brokers with no topics.
    pub fn new() -> Self {
        Self::with_broker_count(3)
    }

    /// A cluster of `count` brokers with ids starting at 1.
    pub fn with_broker_count(count: i32) -> Self {
        Self {
            state: Arc::default(),
            broker_ids: (1..=count).collect(),
        }
    }

    /// Seed an existing topic.
    pub fn with_topic(self, name: &str, partitions: i32, replication_factor: i32) -> Self {
        let layout = self.layout(name, partitions, replication_factor);
        self.lock().topics.insert(name.to_string(), layout);
        self
    }

    /// Make every request fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make `dial` fail while create and delete requests still go through.
    pub fn set_dial_refused(&self, refused: bool) {
        self.lock().refuse_dials = refused;
    }

    /// Fail the next topic in a create request with `message`.
    pub fn push_create_error(&self, message: impl Into<String>) {
        self.lock().create_errors.push_back(message.into());
    }

    /// Fail the next topic in a delete request with `message`.
    pub fn push_delete_error(&self, message: impl Into<String>) {
        self.lock().delete_errors.push_back(message.into());
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().calls.clone()
    }

    /// Addresses dialed so far.
    pub fn dialed_addrs(&self) -> Vec<SocketAddr> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BrokerCall::Dial(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    /// Names of the existing topics, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        self.lock().topics.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn layout(
        &self,
        name: &str,
        partitions: i32,
        replication_factor: i32,
    ) -> Vec<PartitionMetadata> {
        let count = self.broker_ids.len().max(1);
        (0..partitions)
            .map(|id| {
                let replicas: Vec<i32> = (0..replication_factor)
                    .map(|r| {
                        let index = (id + r) as usize % count;
                        self.broker_ids.get(index).copied().unwrap_or(index as i32 + 1)
                    })
                    .collect();
                PartitionMetadata {
                    topic: name.to_string(),
                    id,
                    leader: replicas.first().copied().unwrap_or(-1),
                    replicas,
                }
            })
            .collect()
    }

    fn refuse(addr: SocketAddr) -> BrokerError {
        BrokerError::Connection {
            addr,
            message: "connection refused".to_string(),
        }
    }
}

struct InMemoryConnection {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn read_partitions(
        &self,
        topics: &[&str],
    ) -> Result<Vec<PartitionMetadata>, BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(BrokerCall::ReadPartitions(
            topics.iter().map(|t| t.to_string()).collect(),
        ));

        Ok(state
            .topics
            .iter()
            .filter(|(name, _)| topics.is_empty() || topics.contains(&name.as_str()))
            .flat_map(|(_, partitions)| partitions.iter().cloned())
            .collect())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn dial(&self, addr: SocketAddr) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let mut state = self.lock();
        state.calls.push(BrokerCall::Dial(addr));
        if state.unreachable || state.refuse_dials {
            return Err(Self::refuse(addr));
        }

        Ok(Box::new(InMemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }

    async fn create_topics(
        &self,
        addr: SocketAddr,
        topics: &[TopicSpec],
    ) -> Result<Vec<TopicError>, BrokerError> {
        let mut state = self.lock();
        state.calls.push(BrokerCall::CreateTopics(topics.to_vec()));
        if state.unreachable {
            return Err(Self::refuse(addr));
        }

        let mut errors = Vec::new();
        for spec in topics {
            let failure = if let Some(message) = state.create_errors.pop_front() {
                Some(message)
            } else if state.topics.contains_key(&spec.name) {
                Some(format!("Topic '{}' already exists.", spec.name))
            } else if spec.num_partitions < 1 {
                Some("Number of partitions must be larger than 0.".to_string())
            } else if spec.replication_factor < 1
                || spec.replication_factor as usize > self.broker_ids.len()
            {
                Some(format!(
                    "Replication factor: {} larger than available brokers: {}.",
                    spec.replication_factor,
                    self.broker_ids.len()
                ))
            } else {
                None
            };

            match failure {
                Some(message) => errors.push(TopicError::new(&spec.name, message)),
                None => {
                    let layout =
                        self.layout(&spec.name, spec.num_partitions, spec.replication_factor);
                    state.topics.insert(spec.name.clone(), layout);
                },
            }
        }
        Ok(errors)
    }

    async fn delete_topics(
        &self,
        addr: SocketAddr,
        topics: &[String],
    ) -> Result<Vec<TopicError>, BrokerError> {
        let mut state = self.lock();
        state.calls.push(BrokerCall::DeleteTopics(topics.to_vec()));
        if state.unreachable {
            return Err(Self::refuse(addr));
        }

        let mut errors = Vec::new();
        for name in topics {
            if let Some(message) = state.delete_errors.pop_front() {
                errors.push(TopicError::new(name, message));
            } else if state.topics.remove(name).is_none() {
                errors.push(TopicError::new(name, "Broker: Unknown topic or partition"));
            }
        }
        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::KafkaProvider;
    use serde_json::json;

    const SERVERS: &str = "127.0.0.1:9092";

    async fn configured() -> (Arc<InMemoryBroker>, ProviderTester<KafkaProvider>) {
        let broker = Arc::new(InMemoryBroker::new());
        let tester = ProviderTester::new(KafkaProvider::new(broker.clone()));
        tester
            .configure(json!({ "bootstrap_servers": [SERVERS] }))
            .await
            .unwrap();
        (broker, tester)
    }

    #[tokio::test]
    async fn test_tester_schema_and_types() {
        let (_broker, tester) = configured().await;
        assert!(tester.schema().resources.contains_key("kafka_topic"));
        assert_eq!(tester.resource_types(), vec!["kafka_topic".to_string()]);
        assert_eq!(tester.data_source_types(), vec!["kafka_topic".to_string()]);
    }

    #[tokio::test]
    async fn test_tester_plan_create() {
        let (_broker, tester) = configured().await;
        let plan = tester
            .plan_create(
                "kafka_topic",
                json!({"name": "orders", "partitions": 3, "replication_factor": 2}),
            )
            .await
            .unwrap();

        assert_plan_creates(&plan);
        assert_plan_changes_attribute(&plan, "partitions");
    }

    #[tokio::test]
    async fn test_tester_lifecycle_crud() {
        let (broker, tester) = configured().await;
        let final_state = tester
            .lifecycle_crud(
                "kafka_topic",
                json!({"name": "orders", "partitions": 3, "replication_factor": 2}),
                json!({"name": "orders", "partitions": 6, "replication_factor": 2}),
            )
            .await
            .unwrap();

        assert_eq!(final_state["partitions"], 6);
        assert!(broker.topic_names().is_empty());
    }

    #[tokio::test]
    async fn test_tester_configure_reports_diagnostics() {
        let tester = ProviderTester::new(KafkaProvider::new(Arc::new(InMemoryBroker::new())));
        let err = tester
            .configure(json!({ "bootstrap_servers": ["no-port"] }))
            .await
            .unwrap_err();

        match err {
            TestError::Diagnostics(diags) => assert_error_contains(&diags, "no-port"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_in_memory_broker_create_and_list() {
        let broker = InMemoryBroker::new();
        let addr: SocketAddr = SERVERS.parse().unwrap();

        let errors = broker
            .create_topics(addr, &[TopicSpec::new("orders", 2, 3)])
            .await
            .unwrap();
        assert!(errors.is_empty());

        let conn = broker.dial(addr).await.unwrap();
        let partitions = conn.read_partitions(&["orders"]).await.unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].replicas, vec![1, 2, 3]);
        assert_eq!(partitions[1].replicas, vec![2, 3, 1]);
        assert_eq!(broker.dialed_addrs(), vec![addr]);
    }

    #[tokio::test]
    async fn test_in_memory_broker_rejections() {
        let broker = InMemoryBroker::with_broker_count(1).with_topic("orders", 1, 1);
        let addr: SocketAddr = SERVERS.parse().unwrap();

        let errors = broker
            .create_topics(
                addr,
                &[
                    TopicSpec::new("orders", 1, 1),
                    TopicSpec::new("payments", 1, 2),
                ],
            )
            .await
            .unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "Topic 'orders' already exists.");
        assert!(errors[1].message.contains("larger than available brokers: 1"));

        let errors = broker
            .delete_topics(addr, &["missing".to_string()])
            .await
            .unwrap();
        assert_eq!(errors[0].message, "Broker: Unknown topic or partition");
    }

    #[tokio::test]
    async fn test_in_memory_broker_unreachable() {
        let broker = InMemoryBroker::new();
        broker.set_unreachable(true);
        let addr: SocketAddr = SERVERS.parse().unwrap();

        assert!(broker.dial(addr).await.is_err());
        let err = broker.delete_topics(addr, &[]).await.unwrap_err();
        assert!(matches!(err, BrokerError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_broker_refused_dials() {
        let broker = InMemoryBroker::new();
        broker.set_dial_refused(true);
        let addr: SocketAddr = SERVERS.parse().unwrap();

        assert!(broker.dial(addr).await.is_err());
        let errors = broker
            .create_topics(addr, &[TopicSpec::new("orders", 1, 1)])
            .await
            .unwrap();
        assert!(errors.is_empty());
        assert_eq!(broker.topic_names(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_errors_only_drops_warnings() {
        assert!(errors_only(vec![Diagnostic::warning("slow")]).is_ok());
        match errors_only(vec![Diagnostic::warning("slow"), Diagnostic::error("down")]) {
            Err(TestError::Diagnostics(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("partitions"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("partitions"));
        assert!(display.contains("More info"));
    }
}
