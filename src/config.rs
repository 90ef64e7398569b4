//! Provider configuration: the bootstrap server list and its resolution.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Name of the provider configuration attribute.
pub const BOOTSTRAP_SERVERS: &str = "bootstrap_servers";

/// Environment variable used when `bootstrap_servers` is not configured.
pub const BOOTSTRAP_SERVERS_ENV: &str = "KAFKA_BOOTSTRAP_SERVERS";

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    bootstrap_servers: Option<Vec<String>>,
}

/// Decoded provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Broker addresses in `host:port` form. Only the first is used.
    pub bootstrap_servers: Vec<String>,
}

impl ProviderConfig {
    /// The provider configuration schema.
    pub fn schema() -> Schema {
        Schema::v0().with_attribute(
            BOOTSTRAP_SERVERS,
            Attribute::required_string_list()
                .with_description("a list of kafka brokers")
                .with_env_default(BOOTSTRAP_SERVERS_ENV),
        )
    }

    /// Decode configuration sent by the host, falling back to
    /// [`BOOTSTRAP_SERVERS_ENV`] when the list is absent or null.
    pub fn from_value(config: Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(config, std::env::var(BOOTSTRAP_SERVERS_ENV).ok())
    }

    fn from_value_with_env(config: Value, env: Option<String>) -> Result<Self, ProviderError> {
        let raw: RawConfig = match config {
            Value::Null => RawConfig::default(),
            other => serde_json::from_value(other)?,
        };

        let bootstrap_servers = match raw.bootstrap_servers {
            Some(servers) => servers,
            None => env.as_deref().map(split_env).unwrap_or_default(),
        };

        if bootstrap_servers.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "{} must contain at least one address (set it or {})",
                BOOTSTRAP_SERVERS, BOOTSTRAP_SERVERS_ENV
            )));
        }

        Ok(Self { bootstrap_servers })
    }

    /// Resolve the first bootstrap server to a socket address.
    ///
    /// Later entries are never looked up.
    pub async fn resolve(&self) -> Result<SocketAddr, ProviderError> {
        let first = self.bootstrap_servers.first().ok_or_else(|| {
            ProviderError::Configuration(format!("{} is empty", BOOTSTRAP_SERVERS))
        })?;

        let mut addrs = tokio::net::lookup_host(first.as_str())
            .await
            .map_err(|e| ProviderError::Configuration(format!("resolve {}: {}", first, e)))?;
        let addr = addrs.next().ok_or_else(|| {
            ProviderError::Configuration(format!("resolve {}: no addresses found", first))
        })?;

        debug!(server = %first, %addr, "Resolved bootstrap server");
        Ok(addr)
    }
}

fn split_env(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_reads_list() {
        let config = ProviderConfig::from_value_with_env(
            json!({"bootstrap_servers": ["broker1:9092", "broker2:9092"]}),
            Some("ignored:9092".to_string()),
        )
        .unwrap();
        assert_eq!(config.bootstrap_servers, vec!["broker1:9092", "broker2:9092"]);
    }

    #[test]
    fn test_from_value_falls_back_to_env() {
        let config = ProviderConfig::from_value_with_env(
            json!({"bootstrap_servers": null}),
            Some("a:9092, b:9092,".to_string()),
        )
        .unwrap();
        assert_eq!(config.bootstrap_servers, vec!["a:9092", "b:9092"]);

        let config =
            ProviderConfig::from_value_with_env(Value::Null, Some("c:9092".to_string())).unwrap();
        assert_eq!(config.bootstrap_servers, vec!["c:9092"]);
    }

    #[test]
    fn test_from_value_rejects_empty() {
        let err = ProviderConfig::from_value_with_env(json!({"bootstrap_servers": []}), None)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let err = ProviderConfig::from_value_with_env(json!({}), None).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_from_value_rejects_wrong_type() {
        let err =
            ProviderConfig::from_value_with_env(json!({"bootstrap_servers": "a:9092"}), None)
                .unwrap_err();
        assert!(matches!(err, ProviderError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_resolve_uses_first_entry_only() {
        let config = ProviderConfig {
            bootstrap_servers: vec![
                "127.0.0.1:9092".to_string(),
                "does-not-resolve.invalid:9092".to_string(),
            ],
        };
        let addr = config.resolve().await.unwrap();
        assert_eq!(addr, "127.0.0.1:9092".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_rejects_missing_port() {
        let config = ProviderConfig {
            bootstrap_servers: vec!["127.0.0.1".to_string()],
        };
        let err = config.resolve().await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.to_string().contains("127.0.0.1"));
    }

    #[test]
    fn test_schema_defaults_from_env() {
        let schema = ProviderConfig::schema();
        let attr = schema.attribute(BOOTSTRAP_SERVERS).unwrap();
        assert!(attr.flags.required);
        assert_eq!(attr.env_default.as_deref(), Some(BOOTSTRAP_SERVERS_ENV));
    }
}
