use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    replication_factor, timestamp_id, ID, LAST_UPDATED, NAME, PARTITIONS, REPLICATION_FACTOR,
    RESOURCE_MISSING_REPLICATION_FACTOR,
};
use crate::broker::TopicSpec;
use crate::client::KafkaClient;
use crate::resource::{Resource, ResourceData};
use crate::schema::{has_errors, Attribute, Diagnostic, Schema};

/// A Kafka topic managed by name.
///
/// Every configurable attribute forces replacement, so `update` is a full
/// delete-and-recreate cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicResource;

fn to_i32(data: &ResourceData, key: &str) -> Result<i32, Diagnostic> {
    let value = data.get_i64(key);
    i32::try_from(value).map_err(|_| {
        Diagnostic::error(format!("Invalid value for attribute '{}'", key))
            .with_detail(format!("{} does not fit in a 32-bit integer", value))
            .with_attribute(key)
    })
}

#[async_trait]
impl Resource for TopicResource {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "Represents simplistic information about a kafka topic. \
                 Altering any of these will force a new resource to be created.",
            )
            .with_attribute(ID, Attribute::computed_string())
            .with_attribute(
                NAME,
                Attribute::required_string()
                    .with_description("name of the topic")
                    .with_force_new(),
            )
            .with_attribute(
                PARTITIONS,
                Attribute::required_int64()
                    .with_description("number of partitions")
                    .with_force_new()
                    .with_min_value(1),
            )
            .with_attribute(
                REPLICATION_FACTOR,
                Attribute::required_int64()
                    .with_description("replication factor")
                    .with_force_new()
                    .with_min_value(1),
            )
            .with_attribute(
                LAST_UPDATED,
                Attribute::optional_computed_string()
                    .with_description("time of the last replacement made through update"),
            )
    }

    async fn create(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic> {
        let (partitions, replicas) =
            match (to_i32(data, PARTITIONS), to_i32(data, REPLICATION_FACTOR)) {
                (Ok(p), Ok(r)) => (p, r),
                (p, r) => return p.err().into_iter().chain(r.err()).collect(),
            };
        let spec = TopicSpec::new(data.get_str(NAME), partitions, replicas);
        info!(topic = %spec.name, partitions, replication_factor = replicas, "Creating topic");

        let errors = match client.create_topics(&[spec]).await {
            Ok(errors) => errors,
            Err(e) => return vec![Diagnostic::from_error(e)],
        };
        if !errors.is_empty() {
            warn!(errors = errors.len(), "Broker rejected topic creation");
            return errors
                .into_iter()
                .map(|e| Diagnostic::error(e.message))
                .collect();
        }

        data.set_id(timestamp_id());
        self.read(client, data).await
    }

    async fn read(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic> {
        let conn = match client.dial().await {
            Ok(conn) => conn,
            Err(e) => return vec![Diagnostic::from_error(e)],
        };

        let name = data.get_str(NAME).to_string();
        let partitions = match conn.read_partitions(&[name.as_str()]).await {
            Ok(partitions) => partitions,
            Err(e) => return vec![Diagnostic::from_error(e)],
        };
        debug!(topic = %name, partitions = partitions.len(), "Read topic");

        data.set(
            REPLICATION_FACTOR,
            replication_factor(&partitions, RESOURCE_MISSING_REPLICATION_FACTOR),
        );
        data.set(PARTITIONS, partitions.len() as i64);
        data.set(NAME, name);
        Vec::new()
    }

    async fn update(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic> {
        let diagnostics = self.delete(client, data).await;
        if has_errors(&diagnostics) {
            return diagnostics;
        }

        let diagnostics = self.create(client, data).await;
        if has_errors(&diagnostics) {
            return diagnostics;
        }

        data.set(LAST_UPDATED, chrono::Local::now().to_string());
        self.read(client, data).await
    }

    async fn delete(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic> {
        let name = data.get_str(NAME).to_string();
        info!(topic = %name, "Deleting topic");

        let errors = match client.delete_topics(&[name]).await {
            Ok(errors) => errors,
            Err(e) => return vec![Diagnostic::from_error(e)],
        };

        let diagnostics: Vec<Diagnostic> = errors
            .into_iter()
            .map(|e| Diagnostic::error("encountered an error").with_detail(e.message))
            .collect();
        if !diagnostics.is_empty() {
            warn!(errors = diagnostics.len(), "Broker reported errors deleting topic");
        }

        // Cleared even when the broker reported per-topic errors.
        data.set_id("");
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BrokerCall, InMemoryBroker};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryBroker>, KafkaClient) {
        let broker = Arc::new(InMemoryBroker::new());
        let client = KafkaClient::new("127.0.0.1:9092".parse().unwrap(), broker.clone());
        (broker, client)
    }

    fn topic(name: &str, partitions: i64, replication_factor: i64) -> ResourceData {
        ResourceData::from_state(json!({
            "name": name,
            "partitions": partitions,
            "replication_factor": replication_factor,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_read_reports_requested_shape() {
        let (broker, client) = setup();
        let mut data = topic("orders", 3, 2);

        let diagnostics = TopicResource.create(&client, &mut data).await;
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        assert!(!data.id().is_empty());
        assert!(data.id().parse::<i64>().is_ok());
        assert_eq!(data.get_str("name"), "orders");
        assert_eq!(data.get_i64("partitions"), 3);
        assert_eq!(data.get_i64("replication_factor"), 2);
        assert_eq!(broker.topic_names(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_create_reports_every_topic_error_without_id() {
        let (broker, client) = setup();
        broker.push_create_error("Topic 'orders' already exists.");
        let mut data = topic("orders", 3, 2);

        let diagnostics = TopicResource.create(&client, &mut data).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Topic 'orders' already exists.");
        assert_eq!(data.id(), "");
        // No read happened after the failed create.
        assert!(!broker
            .calls()
            .iter()
            .any(|c| matches!(c, BrokerCall::ReadPartitions(_))));
    }

    #[tokio::test]
    async fn test_create_request_failure() {
        let (broker, client) = setup();
        broker.set_unreachable(true);
        let mut data = topic("orders", 1, 1);

        let diagnostics = TopicResource.create(&client, &mut data).await;
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("failed to connect"));
        assert_eq!(data.id(), "");
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_partitions() {
        let (broker, client) = setup();
        let mut data = topic("orders", i64::from(i32::MAX) + 1, 1);

        let diagnostics = TopicResource.create(&client, &mut data).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("partitions"));
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_topic_uses_negative_sentinel() {
        let (_broker, client) = setup();
        let mut data = topic("ghost", 3, 2);
        data.set_id("1700000000");

        let diagnostics = TopicResource.read(&client, &mut data).await;
        assert!(diagnostics.is_empty());
        assert_eq!(data.get_i64("partitions"), 0);
        assert_eq!(data.get_i64("replication_factor"), -1);
        assert_eq!(data.id(), "1700000000");
    }

    #[tokio::test]
    async fn test_read_filters_by_name() {
        let broker = Arc::new(
            InMemoryBroker::new()
                .with_topic("orders", 3, 2)
                .with_topic("payments", 6, 3),
        );
        let client = KafkaClient::new("127.0.0.1:9092".parse().unwrap(), broker.clone());
        let mut data = topic("payments", 1, 1);

        let diagnostics = TopicResource.read(&client, &mut data).await;
        assert!(diagnostics.is_empty());
        assert_eq!(data.get_i64("partitions"), 6);
        assert_eq!(data.get_i64("replication_factor"), 3);
        assert!(broker
            .calls()
            .contains(&BrokerCall::ReadPartitions(vec!["payments".to_string()])));
    }

    #[tokio::test]
    async fn test_read_connection_failure_leaves_state_untouched() {
        let (broker, client) = setup();
        broker.set_unreachable(true);
        let mut data = topic("orders", 3, 2);
        let before = data.clone();

        let diagnostics = TopicResource.read(&client, &mut data).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(data, before);
    }

    #[tokio::test]
    async fn test_delete_clears_id() {
        let broker = Arc::new(InMemoryBroker::new().with_topic("orders", 3, 2));
        let client = KafkaClient::new("127.0.0.1:9092".parse().unwrap(), broker.clone());
        let mut data = topic("orders", 3, 2);
        data.set_id("1700000000");

        let diagnostics = TopicResource.delete(&client, &mut data).await;
        assert!(diagnostics.is_empty());
        assert_eq!(data.id(), "");
        assert!(broker.topic_names().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_topic_still_clears_id() {
        let (_broker, client) = setup();
        let mut data = topic("gone", 3, 2);
        data.set_id("1700000000");

        let diagnostics = TopicResource.delete(&client, &mut data).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "encountered an error");
        assert!(diagnostics[0].detail.is_some());
        assert_eq!(data.id(), "");
    }

    #[tokio::test]
    async fn test_update_recreates_and_stamps_last_updated() {
        let broker = Arc::new(InMemoryBroker::new().with_topic("orders", 3, 2));
        let client = KafkaClient::new("127.0.0.1:9092".parse().unwrap(), broker.clone());
        let mut data = topic("orders", 3, 2);
        data.set_id("1");

        let diagnostics = TopicResource.update(&client, &mut data).await;
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert!(!data.get_str("last_updated").is_empty());
        assert_ne!(data.id(), "");
        assert_eq!(data.get_i64("partitions"), 3);

        let calls = broker.calls();
        let delete = calls
            .iter()
            .position(|c| matches!(c, BrokerCall::DeleteTopics(_)))
            .unwrap();
        let create = calls
            .iter()
            .position(|c| matches!(c, BrokerCall::CreateTopics(_)))
            .unwrap();
        assert!(delete < create);
    }

    #[tokio::test]
    async fn test_update_stops_when_delete_fails() {
        let (broker, client) = setup();
        let mut data = topic("orders", 3, 2);
        data.set_id("1");

        let diagnostics = TopicResource.update(&client, &mut data).await;
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "encountered an error");
        assert!(!broker
            .calls()
            .iter()
            .any(|c| matches!(c, BrokerCall::CreateTopics(_))));
        assert!(data.get("last_updated").is_none());
    }

    #[tokio::test]
    async fn test_update_stops_when_create_fails() {
        let broker = Arc::new(InMemoryBroker::new().with_topic("orders", 3, 2));
        let client = KafkaClient::new("127.0.0.1:9092".parse().unwrap(), broker.clone());
        broker.push_create_error("Replication factor: 9 larger than available brokers: 3.");
        let mut data = topic("orders", 3, 2);
        data.set_id("1");

        let diagnostics = TopicResource.update(&client, &mut data).await;
        assert_eq!(diagnostics.len(), 1);
        assert!(data.get("last_updated").is_none());
        assert!(!broker
            .calls()
            .iter()
            .any(|c| matches!(c, BrokerCall::ReadPartitions(_))));
    }

    #[test]
    fn test_schema_forces_replacement() {
        let schema = TopicResource.schema();
        for name in ["name", "partitions", "replication_factor"] {
            let attr = schema.attribute(name).unwrap();
            assert!(attr.flags.required, "{} should be required", name);
            assert!(attr.force_new, "{} should force replacement", name);
        }
        let last_updated = schema.attribute("last_updated").unwrap();
        assert!(last_updated.flags.optional && last_updated.flags.computed);
        assert!(!last_updated.force_new);
    }
}
