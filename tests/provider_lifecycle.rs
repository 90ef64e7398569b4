//! End-to-end topic lifecycle against an in-memory broker.

use std::sync::Arc;

use hemmer_provider_kafka::testing::{
    assert_error_contains, assert_plan_changes_attribute, assert_plan_creates,
    assert_plan_no_changes, assert_plan_replaces, BrokerCall, InMemoryBroker, ProviderTester,
    TestError,
};
use hemmer_provider_kafka::{KafkaProvider, ProviderError, ProviderService};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

const TOPIC: &str = "kafka_topic";

async fn configured(broker: &Arc<InMemoryBroker>) -> ProviderTester<KafkaProvider> {
    let tester = ProviderTester::new(KafkaProvider::new(broker.clone()));
    assert_ok!(
        tester
            .configure(json!({"bootstrap_servers": ["127.0.0.1:9092", "127.0.0.2:9092"]}))
            .await
    );
    tester
}

fn orders(partitions: i64, replication_factor: i64) -> Value {
    json!({"name": "orders", "partitions": partitions, "replication_factor": replication_factor})
}

#[tokio::test]
async fn create_then_read_reports_requested_shape() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;

    let before = chrono::Utc::now().timestamp();
    let state = assert_ok!(tester.lifecycle_create(TOPIC, orders(3, 2)).await);
    let after = chrono::Utc::now().timestamp();

    assert_eq!(state["name"], "orders");
    assert_eq!(state["partitions"], 3);
    assert_eq!(state["replication_factor"], 2);
    let id: i64 = state["id"].as_str().unwrap().parse().unwrap();
    assert!(before <= id && id <= after);
}

#[tokio::test]
async fn only_first_bootstrap_server_is_used() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;

    assert_ok!(tester.lifecycle_create(TOPIC, orders(1, 1)).await);

    let dialed = broker.dialed_addrs();
    assert!(!dialed.is_empty());
    assert!(dialed.iter().all(|a| *a == "127.0.0.1:9092".parse().unwrap()));
}

#[tokio::test]
async fn create_existing_topic_fails_without_state() {
    let broker = Arc::new(InMemoryBroker::new().with_topic("orders", 3, 2));
    let tester = configured(&broker).await;

    let err = assert_err!(tester.create(TOPIC, orders(3, 2)).await);
    let diagnostics = err.into_diagnostics();
    assert_error_contains(&diagnostics, "already exists");
}

#[tokio::test]
async fn created_topic_keeps_id_when_read_back_fails() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;
    broker.set_dial_refused(true);

    // Through the tester the failure is an error...
    let err = assert_err!(tester.create(TOPIC, orders(3, 2)).await);
    assert_error_contains(&err.into_diagnostics(), "connection refused");

    // ...but the provider hands back the new id alongside it.
    let payments = json!({"name": "payments", "partitions": 1, "replication_factor": 1});
    let result = assert_ok!(tester.provider().create(TOPIC, payments).await);
    assert!(result.has_errors());
    let state = result.state.unwrap();
    assert!(state["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(
        broker.topic_names(),
        vec!["orders".to_string(), "payments".to_string()]
    );

    broker.set_dial_refused(false);
    let read = assert_ok!(tester.read(TOPIC, state).await);
    assert_eq!(read["partitions"], 1);
}

#[tokio::test]
async fn delete_missing_topic_reports_and_forgets() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;

    let mut state = orders(3, 2);
    state["id"] = json!("1700000000");
    let err = assert_err!(tester.delete(TOPIC, state).await);

    match err {
        ProviderError::Diagnostics(diagnostics) => {
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].summary, "encountered an error");
            assert_eq!(
                diagnostics[0].detail.as_deref(),
                Some("Broker: Unknown topic or partition")
            );
        },
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn read_after_external_delete_uses_sentinel() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;

    let state = assert_ok!(tester.lifecycle_create(TOPIC, orders(3, 2)).await);
    assert_ok!(tester.delete(TOPIC, state.clone()).await);
    assert!(broker.topic_names().is_empty());

    let state = assert_ok!(tester.read(TOPIC, state).await);
    assert_eq!(state["partitions"], 0);
    assert_eq!(state["replication_factor"], -1);
}

#[tokio::test]
async fn changing_partitions_replaces_the_topic() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;

    let created = assert_ok!(tester.lifecycle_create(TOPIC, orders(3, 2)).await);

    let plan = assert_ok!(tester.plan_update(TOPIC, created.clone(), orders(3, 2)).await);
    assert_plan_no_changes(&plan);

    let plan = assert_ok!(tester.plan_update(TOPIC, created.clone(), orders(6, 2)).await);
    assert_plan_replaces(&plan);
    assert_plan_changes_attribute(&plan, "partitions");
    assert_eq!(plan.planned_state["id"], Value::Null);

    let updated = assert_ok!(
        tester
            .update(TOPIC, created, plan.planned_state)
            .await
    );
    assert_eq!(updated["partitions"], 6);
    assert!(updated["last_updated"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(broker.topic_names(), vec!["orders".to_string()]);

    let calls = broker.calls();
    let delete = calls
        .iter()
        .position(|c| matches!(c, BrokerCall::DeleteTopics(_)))
        .unwrap();
    let create = calls
        .iter()
        .rposition(|c| matches!(c, BrokerCall::CreateTopics(_)))
        .unwrap();
    assert!(delete < create);
}

#[tokio::test]
async fn update_stops_after_failed_delete() {
    let broker = Arc::new(InMemoryBroker::new().with_topic("orders", 3, 2));
    let tester = configured(&broker).await;
    broker.push_delete_error("Broker: Topic authorization failed");

    let mut prior = orders(3, 2);
    prior["id"] = json!("1");
    let err = assert_err!(tester.update(TOPIC, prior, orders(6, 2)).await);

    assert_error_contains(&err.into_diagnostics(), "encountered an error");
    assert!(!broker
        .calls()
        .iter()
        .any(|c| matches!(c, BrokerCall::CreateTopics(_))));
}

#[tokio::test]
async fn data_source_counts_every_partition() {
    let broker = Arc::new(
        InMemoryBroker::new()
            .with_topic("orders", 3, 2)
            .with_topic("payments", 1, 1),
    );
    let tester = configured(&broker).await;

    assert_ok!(
        tester
            .validate_data_source_config(TOPIC, json!({"name": "orders"}))
            .await
    );
    let state = assert_ok!(tester.read_data_source(TOPIC, json!({"name": "orders"})).await);
    assert_eq!(state["name"], "orders");
    assert_eq!(state["partitions"], 4);
    assert_eq!(state["replication_factor"], 2);
    assert!(state["id"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn data_source_on_empty_cluster() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;

    let state = assert_ok!(tester.read_data_source(TOPIC, json!({"name": "ghost"})).await);
    assert_eq!(state["partitions"], 0);
    assert_eq!(state["replication_factor"], 0);
}

#[tokio::test]
async fn validation_rejects_bad_topic_config() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = configured(&broker).await;

    let plan = assert_ok!(tester.plan_create(TOPIC, orders(3, 2)).await);
    assert_plan_creates(&plan);

    assert_ok!(tester.validate_resource_config(TOPIC, orders(3, 2)).await);

    match tester.validate_resource_config(TOPIC, orders(0, 1)).await {
        Err(TestError::Diagnostics(diagnostics)) => {
            assert_error_contains(&diagnostics, "partitions");
        },
        other => panic!("expected diagnostics, got {:?}", other),
    }

    match tester
        .validate_resource_config(TOPIC, json!({"name": "orders"}))
        .await
    {
        Err(TestError::Diagnostics(diagnostics)) => assert_eq!(diagnostics.len(), 2),
        other => panic!("expected diagnostics, got {:?}", other),
    }
}

#[tokio::test]
async fn operations_before_configure_fail() {
    let broker = Arc::new(InMemoryBroker::new());
    let tester = ProviderTester::new(KafkaProvider::new(broker.clone()));

    let err = assert_err!(tester.create(TOPIC, orders(3, 2)).await);
    assert!(matches!(err, ProviderError::NotConfigured(_)));
    assert!(broker.calls().is_empty());

    let diagnostics = err.into_diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_error_contains(&diagnostics, "not configured");
}
