use async_trait::async_trait;
use tracing::debug;

use super::{
    replication_factor, timestamp_id, DATA_SOURCE_MISSING_REPLICATION_FACTOR, ID, NAME,
    PARTITIONS, REPLICATION_FACTOR,
};
use crate::client::KafkaClient;
use crate::resource::{DataSource, ResourceData};
use crate::schema::{Attribute, Diagnostic, Schema};

/// Read-only view of a Kafka topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicDataSource;

#[async_trait]
impl DataSource for TopicDataSource {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Simplistic information about a kafka topic.")
            .with_attribute(ID, Attribute::computed_string())
            .with_attribute(
                NAME,
                Attribute::required_string().with_description("name of the topic"),
            )
            .with_attribute(
                PARTITIONS,
                Attribute::computed_int64().with_description("number of partitions"),
            )
            .with_attribute(
                REPLICATION_FACTOR,
                Attribute::computed_int64().with_description("replication factor"),
            )
    }

    async fn read(&self, client: &KafkaClient, data: &mut ResourceData) -> Vec<Diagnostic> {
        let conn = match client.dial().await {
            Ok(conn) => conn,
            Err(e) => return vec![Diagnostic::from_error(e)],
        };

        // The listing is not filtered by name.
        let partitions = match conn.read_partitions(&[]).await {
            Ok(partitions) => partitions,
            Err(e) => return vec![Diagnostic::from_error(e)],
        };

        let name = data.get_str(NAME).to_string();
        debug!(topic = %name, partitions = partitions.len(), "Read topic data source");

        data.set(NAME, name);
        data.set(PARTITIONS, partitions.len() as i64);
        data.set(
            REPLICATION_FACTOR,
            replication_factor(&partitions, DATA_SOURCE_MISSING_REPLICATION_FACTOR),
        );
        data.set_id(timestamp_id());
        Vec::new()
    }
}
