//! Hemmer provider for Kafka topics.
//!
//! This crate implements a Hemmer provider plugin that manages Kafka topics
//! over the Hemmer provider gRPC protocol.
//!
//! # Overview
//!
//! - **`kafka_topic` resource**: create, read, update (delete + recreate) and
//!   delete a topic by name, with partition count and replication factor
//! - **`kafka_topic` data source**: partition count and replication factor as
//!   reported by the broker
//! - **Provider configuration**: `bootstrap_servers`, defaulting from the
//!   `KAFKA_BOOTSTRAP_SERVERS` environment variable
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_kafka::{serve, KafkaProvider, RdKafkaBroker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     hemmer_provider_kafka::init_logging();
//!     serve(KafkaProvider::new(Arc::new(RdKafkaBroker::new()))).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When started via [`serve`], the provider outputs a handshake string to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! With [`serve_debug`] the handshake is replaced by instructions for setting
//! `HEMMER_REATTACH_PROVIDERS`, so a host can attach to a provider running
//! under a debugger.
//!
//! # Broker access
//!
//! Topic handlers only see the [`Broker`] trait: dial + list partitions,
//! create topics, delete topics. [`RdKafkaBroker`] implements it with
//! `rdkafka`; [`testing::InMemoryBroker`] implements it in memory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod kafka;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod server;
pub mod testing;
pub mod topic;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use broker::{Broker, BrokerConnection, BrokerError};
pub use client::KafkaClient;
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use kafka::RdKafkaBroker;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{KafkaProvider, PROVIDER_ADDRESS};
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_debug, serve_listener_with_shutdown, serve_with_options, ProviderService,
    ServeOptions,
};
pub use types::{
    AttributeChange, PlanResult, ProviderMetadata, ServerCapabilities, StateResult,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{validate, validate_result};
