//! The handle produced by provider configuration.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::broker::{Broker, BrokerConnection, BrokerError, TopicError, TopicSpec};

/// A resolved broker address plus the broker implementation used to reach it.
///
/// Built once by `Configure` and passed explicitly to every resource and data
/// source operation. Cloning is cheap; no connection is held.
#[derive(Clone)]
pub struct KafkaClient {
    addr: SocketAddr,
    broker: Arc<dyn Broker>,
}

impl KafkaClient {
    /// Create a client for `addr`.
    pub fn new(addr: SocketAddr, broker: Arc<dyn Broker>) -> Self {
        Self { addr, broker }
    }

    /// The resolved bootstrap address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open a short-lived connection. It closes when dropped.
    pub async fn dial(&self) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        debug!(addr = %self.addr, "Dialing broker");
        self.broker.dial(self.addr).await
    }

    /// Create topics, returning per-topic errors.
    pub async fn create_topics(
        &self,
        topics: &[TopicSpec],
    ) -> Result<Vec<TopicError>, BrokerError> {
        self.broker.create_topics(self.addr, topics).await
    }

    /// Delete topics by name, returning per-topic errors.
    pub async fn delete_topics(
        &self,
        topics: &[String],
    ) -> Result<Vec<TopicError>, BrokerError> {
        self.broker.delete_topics(self.addr, topics).await
    }
}

impl fmt::Debug for KafkaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}
