//! The `kafka_topic` resource and data source.

mod data_source;
mod resource;

pub use data_source::TopicDataSource;
pub use resource::TopicResource;

use crate::broker::PartitionMetadata;

/// Type name shared by the resource and the data source.
pub const TOPIC_TYPE: &str = "kafka_topic";

/// Replication factor the resource reports for a topic with no partitions.
pub const RESOURCE_MISSING_REPLICATION_FACTOR: i64 = -1;

/// Replication factor the data source reports when the broker returns no partitions.
pub const DATA_SOURCE_MISSING_REPLICATION_FACTOR: i64 = 0;

pub(crate) const NAME: &str = "name";
pub(crate) const PARTITIONS: &str = "partitions";
pub(crate) const REPLICATION_FACTOR: &str = "replication_factor";
pub(crate) const LAST_UPDATED: &str = "last_updated";
pub(crate) const ID: &str = "id";

/// Replica count of the first partition, or `missing` when there is none.
fn replication_factor(partitions: &[PartitionMetadata], missing: i64) -> i64 {
    partitions
        .first()
        .map(|p| p.replicas.len() as i64)
        .unwrap_or(missing)
}

/// A fresh identifier: the current Unix time in seconds.
fn timestamp_id() -> String {
    chrono::Utc::now().timestamp().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(id: i32, replicas: Vec<i32>) -> PartitionMetadata {
        PartitionMetadata {
            topic: "orders".to_string(),
            id,
            leader: replicas.first().copied().unwrap_or(-1),
            replicas,
        }
    }

    #[test]
    fn test_replication_factor_uses_first_partition() {
        let partitions = vec![partition(0, vec![1, 2, 3]), partition(1, vec![1])];
        assert_eq!(replication_factor(&partitions, -1), 3);
    }

    #[test]
    fn test_replication_factor_sentinels_differ() {
        assert_eq!(
            replication_factor(&[], RESOURCE_MISSING_REPLICATION_FACTOR),
            -1
        );
        assert_eq!(
            replication_factor(&[], DATA_SOURCE_MISSING_REPLICATION_FACTOR),
            0
        );
    }

    #[test]
    fn test_timestamp_id_is_unix_seconds() {
        let before = chrono::Utc::now().timestamp();
        let id: i64 = timestamp_id().parse().unwrap();
        let after = chrono::Utc::now().timestamp();
        assert!(before <= id && id <= after);
    }
}
