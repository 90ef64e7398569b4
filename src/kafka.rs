//! [`Broker`] implementation on top of librdkafka.
//!
//! Every call builds its own client from the resolved address and drops it
//! before returning, so no connection outlives the operation that opened it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use tracing::{debug, info};

use crate::broker::{
    Broker, BrokerConnection, BrokerError, PartitionMetadata, TopicError, TopicSpec,
};

/// Upper bound for a single broker request.
///
/// librdkafka has no separate connect step; an unreachable broker only shows
/// up as a request that never completes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CLIENT_ID: &str = "hemmer-provider-kafka";

/// Production broker backed by `rdkafka`.
#[derive(Debug, Clone, Default)]
pub struct RdKafkaBroker;

impl RdKafkaBroker {
    /// Create a broker.
    pub fn new() -> Self {
        Self
    }
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", addr.to_string())
        .set("client.id", CLIENT_ID);
    config
}

fn admin_client(addr: SocketAddr) -> Result<AdminClient<DefaultClientContext>, BrokerError> {
    client_config(addr)
        .create()
        .map_err(|e| BrokerError::Connection {
            addr,
            message: e.to_string(),
        })
}

fn admin_options() -> AdminOptions {
    AdminOptions::new().request_timeout(Some(REQUEST_TIMEOUT))
}

fn topic_errors(results: Vec<TopicResult>) -> Vec<TopicError> {
    results
        .into_iter()
        .filter_map(Result::err)
        .map(|(topic, code)| TopicError::new(topic, code.to_string()))
        .collect()
}

/// A metadata connection to one broker.
struct RdKafkaConnection {
    consumer: Arc<BaseConsumer>,
}

#[async_trait]
impl BrokerConnection for RdKafkaConnection {
    async fn read_partitions(
        &self,
        topics: &[&str],
    ) -> Result<Vec<PartitionMetadata>, BrokerError> {
        let wanted: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        let consumer = Arc::clone(&self.consumer);

        let partitions = tokio::task::spawn_blocking(move || {
            let metadata = match wanted.as_slice() {
                [single] => consumer.fetch_metadata(Some(single.as_str()), REQUEST_TIMEOUT)?,
                _ => consumer.fetch_metadata(None, REQUEST_TIMEOUT)?,
            };

            let partitions: Vec<PartitionMetadata> = metadata
                .topics()
                .iter()
                .filter(|topic| wanted.is_empty() || wanted.iter().any(|w| w == topic.name()))
                .flat_map(|topic| {
                    topic.partitions().iter().map(move |p| PartitionMetadata {
                        topic: topic.name().to_string(),
                        id: p.id(),
                        leader: p.leader(),
                        replicas: p.replicas().to_vec(),
                    })
                })
                .collect();
            Ok::<_, BrokerError>(partitions)
        })
        .await??;

        debug!(partitions = partitions.len(), "Read partition metadata");
        Ok(partitions)
    }
}

#[async_trait]
impl Broker for RdKafkaBroker {
    async fn dial(&self, addr: SocketAddr) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let consumer: BaseConsumer = client_config(addr)
            .set("allow.auto.create.topics", "false")
            .create()
            .map_err(|e| BrokerError::Connection {
                addr,
                message: e.to_string(),
            })?;

        Ok(Box::new(RdKafkaConnection {
            consumer: Arc::new(consumer),
        }))
    }

    async fn create_topics(
        &self,
        addr: SocketAddr,
        topics: &[TopicSpec],
    ) -> Result<Vec<TopicError>, BrokerError> {
        let admin = admin_client(addr)?;
        let new_topics: Vec<NewTopic> = topics
            .iter()
            .map(|t| {
                NewTopic::new(
                    &t.name,
                    t.num_partitions,
                    TopicReplication::Fixed(t.replication_factor),
                )
            })
            .collect();

        info!(%addr, topics = new_topics.len(), "Submitting create-topics request");
        let results = admin.create_topics(new_topics.iter(), &admin_options()).await?;
        Ok(topic_errors(results))
    }

    async fn delete_topics(
        &self,
        addr: SocketAddr,
        topics: &[String],
    ) -> Result<Vec<TopicError>, BrokerError> {
        let admin = admin_client(addr)?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();

        info!(%addr, topics = names.len(), "Submitting delete-topics request");
        let results = admin.delete_topics(&names, &admin_options()).await?;
        Ok(topic_errors(results))
    }
}
