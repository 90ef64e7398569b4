//! The broker capabilities the topic handlers depend on.
//!
//! Handlers never talk to Kafka directly. They go through [`Broker`], which
//! exposes exactly three things: dial an address and list partitions, create
//! topics, and delete topics. [`crate::kafka::RdKafkaBroker`] is the production
//! implementation; [`crate::testing::InMemoryBroker`] backs the tests.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors raised by a broker before any per-topic result is available.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("failed to connect to {addr}: {message}")]
    Connection {
        /// Address that was dialed.
        addr: SocketAddr,
        /// Reason reported by the client.
        message: String,
    },

    /// The Kafka client rejected the request.
    #[error(transparent)]
    Kafka(#[from] KafkaError),

    /// A blocking broker call panicked or was cancelled.
    #[error("broker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Metadata for one partition as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    /// Topic the partition belongs to.
    pub topic: String,
    /// Partition number.
    pub id: i32,
    /// Broker id of the current leader.
    pub leader: i32,
    /// Broker ids holding a replica.
    pub replicas: Vec<i32>,
}

/// A topic to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub num_partitions: i32,
    /// Number of replicas per partition.
    pub replication_factor: i32,
}

impl TopicSpec {
    /// Describe a topic.
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor,
        }
    }
}

/// A per-topic failure inside an otherwise successful batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicError {
    /// Topic the error applies to.
    pub topic: String,
    /// Message reported by the broker.
    pub message: String,
}

impl TopicError {
    /// Create a per-topic error.
    pub fn new(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.topic, self.message)
    }
}

/// An open connection to a single broker.
///
/// The connection is released when the value is dropped.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// List partition metadata.
    ///
    /// With an empty `topics` slice every partition on the cluster is
    /// returned; otherwise only partitions of the named topics.
    async fn read_partitions(&self, topics: &[&str])
        -> Result<Vec<PartitionMetadata>, BrokerError>;
}

/// Administrative access to a Kafka cluster.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open a connection to the broker at `addr`.
    async fn dial(&self, addr: SocketAddr) -> Result<Box<dyn BrokerConnection>, BrokerError>;

    /// Submit one create-topics request. Returns the per-topic errors.
    async fn create_topics(
        &self,
        addr: SocketAddr,
        topics: &[TopicSpec],
    ) -> Result<Vec<TopicError>, BrokerError>;

    /// Submit one delete-topics request. Returns the per-topic errors.
    async fn delete_topics(
        &self,
        addr: SocketAddr,
        topics: &[String],
    ) -> Result<Vec<TopicError>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_error_display() {
        let err = TopicError::new("orders", "Broker: Unknown topic or partition");
        assert_eq!(err.to_string(), "orders: Broker: Unknown topic or partition");
    }

    #[test]
    fn test_connection_error_display() {
        let err = BrokerError::Connection {
            addr: "127.0.0.1:9092".parse().unwrap(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to 127.0.0.1:9092: connection refused"
        );
    }

    #[test]
    fn test_topic_spec() {
        let spec = TopicSpec::new("orders", 3, 2);
        assert_eq!(spec.name, "orders");
        assert_eq!(spec.num_partitions, 3);
        assert_eq!(spec.replication_factor, 2);
    }
}
