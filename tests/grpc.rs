//! The provider over a real gRPC channel.

use std::sync::Arc;
use std::time::Duration;

use hemmer_provider_kafka::generated::provider_client::ProviderClient;
use hemmer_provider_kafka::generated::{self as pb, diagnostic::Severity};
use hemmer_provider_kafka::testing::InMemoryBroker;
use hemmer_provider_kafka::{serve_listener_with_shutdown, KafkaProvider, ServeOptions};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_test::assert_ok;
use tonic::transport::Channel;

struct TestServer {
    client: ProviderClient<Channel>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

async fn start(broker: Arc<InMemoryBroker>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, signal) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        serve_listener_with_shutdown(
            KafkaProvider::new(broker),
            listener,
            async move {
                let _ = signal.await;
            },
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(5)),
        )
        .await
        .map_err(|e| e.to_string())
        .unwrap();
    });

    let client = ProviderClient::connect(format!("http://{}", addr))
        .await
        .unwrap();
    TestServer {
        client,
        shutdown,
        handle,
    }
}

fn bytes(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

fn state(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn full_topic_cycle() {
    let broker = Arc::new(InMemoryBroker::new());
    let TestServer {
        mut client,
        shutdown,
        handle,
    } = start(broker.clone()).await;

    let metadata = assert_ok!(client.get_metadata(pb::GetMetadataRequest {}).await).into_inner();
    assert_eq!(metadata.resources, vec!["kafka_topic".to_string()]);
    assert_eq!(metadata.data_sources, vec!["kafka_topic".to_string()]);

    let configure = assert_ok!(
        client
            .configure(pb::ConfigureRequest {
                config: bytes(json!({"bootstrap_servers": ["127.0.0.1:9092"]})),
            })
            .await
    )
    .into_inner();
    assert!(configure.diagnostics.is_empty());

    let config = json!({"name": "orders", "partitions": 3, "replication_factor": 2});
    let plan = assert_ok!(
        client
            .plan(pb::PlanRequest {
                resource_type: "kafka_topic".to_string(),
                prior_state: vec![],
                proposed_state: bytes(config.clone()),
                config: bytes(config),
            })
            .await
    )
    .into_inner();
    assert!(plan.diagnostics.is_empty());
    assert!(!plan.requires_replace);

    let created = assert_ok!(
        client
            .create(pb::CreateRequest {
                resource_type: "kafka_topic".to_string(),
                planned_state: plan.planned_state,
            })
            .await
    )
    .into_inner();
    assert!(created.diagnostics.is_empty());
    let created_state = state(&created.state);
    assert_eq!(created_state["partitions"], 3);
    assert!(created_state["id"].as_str().is_some_and(|s| !s.is_empty()));

    let read = assert_ok!(
        client
            .read(pb::ReadRequest {
                resource_type: "kafka_topic".to_string(),
                current_state: created.state.clone(),
            })
            .await
    )
    .into_inner();
    assert_eq!(state(&read.state)["replication_factor"], 2);

    let deleted = assert_ok!(
        client
            .delete(pb::DeleteRequest {
                resource_type: "kafka_topic".to_string(),
                current_state: read.state.clone(),
            })
            .await
    )
    .into_inner();
    assert!(deleted.diagnostics.is_empty());
    assert!(broker.topic_names().is_empty());

    // A second delete reaches the host as diagnostics, not a transport error.
    let deleted = assert_ok!(
        client
            .delete(pb::DeleteRequest {
                resource_type: "kafka_topic".to_string(),
                current_state: read.state,
            })
            .await
    )
    .into_inner();
    assert_eq!(deleted.diagnostics.len(), 1);
    assert_eq!(deleted.diagnostics[0].severity, Severity::Error as i32);
    assert_eq!(deleted.diagnostics[0].summary, "encountered an error");

    shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn schema_exposes_topic_attributes() {
    let TestServer {
        mut client,
        shutdown,
        handle,
    } = start(Arc::new(InMemoryBroker::new())).await;

    let schema = assert_ok!(client.get_schema(pb::GetSchemaRequest {}).await).into_inner();

    let provider = schema.provider.unwrap().block.unwrap();
    assert_eq!(provider.attributes.len(), 1);
    assert_eq!(provider.attributes[0].name, "bootstrap_servers");

    let topic = schema.resources["kafka_topic"].block.clone().unwrap();
    let names: Vec<&str> = topic.attributes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["id", "last_updated", "name", "partitions", "replication_factor"]
    );
    assert!(topic
        .attributes
        .iter()
        .filter(|a| a.required)
        .all(|a| a.force_new));

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn errors_surface_as_diagnostics() {
    let TestServer {
        mut client,
        shutdown,
        handle,
    } = start(Arc::new(InMemoryBroker::new())).await;

    let read = assert_ok!(
        client
            .read(pb::ReadRequest {
                resource_type: "kafka_topic".to_string(),
                current_state: bytes(json!({"id": "1", "name": "orders"})),
            })
            .await
    )
    .into_inner();
    assert!(read.state.is_empty());
    assert!(read.diagnostics[0].summary.contains("not configured"));

    let validate = assert_ok!(
        client
            .validate_resource_config(pb::ValidateResourceConfigRequest {
                resource_type: "kafka_acl".to_string(),
                config: bytes(json!({})),
            })
            .await
    )
    .into_inner();
    assert_eq!(
        validate.diagnostics[0].summary,
        "Unknown resource type: kafka_acl"
    );

    let status = client
        .configure(pb::ConfigureRequest {
            config: b"{not json".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn create_returns_id_when_read_back_fails() {
    let broker = Arc::new(InMemoryBroker::new());
    let TestServer {
        mut client,
        shutdown,
        handle,
    } = start(broker.clone()).await;

    assert_ok!(
        client
            .configure(pb::ConfigureRequest {
                config: bytes(json!({"bootstrap_servers": ["127.0.0.1:9092"]})),
            })
            .await
    );
    broker.set_dial_refused(true);

    let created = assert_ok!(
        client
            .create(pb::CreateRequest {
                resource_type: "kafka_topic".to_string(),
                planned_state: bytes(json!({
                    "name": "orders",
                    "partitions": 3,
                    "replication_factor": 2,
                })),
            })
            .await
    )
    .into_inner();

    assert_eq!(created.diagnostics.len(), 1);
    assert_eq!(created.diagnostics[0].severity, Severity::Error as i32);
    let created_state = state(&created.state);
    assert!(created_state["id"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(broker.topic_names(), vec!["orders".to_string()]);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}
