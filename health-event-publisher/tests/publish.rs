use std::future;
use std::sync::Arc;

use assert_json_diff::assert_json_include;
use ha_message_bus::{MemoryTransport, MessageBus, DEFAULT_PARTITIONS};
use health_event_publisher::event::{EventError, EventsFile, Location};
use health_event_publisher::publisher::{publish_events, ClusterContext, PublisherError};
use serde_json::{json, Value};

const MESSAGE_TYPE: &str = "ha_event_hare";

fn context() -> ClusterContext {
    ClusterContext {
        message_type: MESSAGE_TYPE.to_string(),
        location: Location {
            cluster_id: "c1".to_string(),
            site_id: "1".to_string(),
            rack_id: "1".to_string(),
            storageset_id: "1".to_string(),
        },
        resource_types: vec!["node".to_string(), "disk".to_string()],
    }
}

fn events(delay: Option<f64>, statuses: &[(&str, &str)]) -> EventsFile {
    let events: serde_json::Map<String, Value> = statuses
        .iter()
        .map(|(key, status)| {
            (
                key.to_string(),
                json!({
                    "source": "monitor",
                    "node_id": "srvnode-1",
                    "resource_type": "node",
                    "resource_id": format!("node-{}", key),
                    "resource_status": status,
                    "specific_info": {"generation_id": key},
                }),
            )
        })
        .collect();
    serde_json::from_value(json!({"events": events, "delay": delay})).unwrap()
}

fn bus() -> (MessageBus, MemoryTransport) {
    let transport = MemoryTransport::new();
    let bus = MessageBus::new();
    assert!(bus.init_with_transport(Arc::new(transport.clone())));
    (bus, transport)
}

fn published(transport: &MemoryTransport) -> Vec<Value> {
    transport
        .messages(MESSAGE_TYPE)
        .iter()
        .map(|message| serde_json::from_str(message).unwrap())
        .collect()
}

#[tokio::test]
async fn publishes_events_in_key_order() {
    let (bus, transport) = bus();
    let producer = bus
        .get_producer("health_event_generator", MESSAGE_TYPE, DEFAULT_PARTITIONS)
        .unwrap();
    let file = events(None, &[("2", "offline"), ("10", "online"), ("1", "failed")]);

    let count = publish_events(&producer, &context(), &file, future::pending())
        .await
        .unwrap();

    assert_eq!(count, 3);
    let messages = published(&transport);
    let ids: Vec<&str> = messages
        .iter()
        .map(|message| message["resource_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["node-1", "node-2", "node-10"]);

    assert_json_include!(
        actual: messages[0].clone(),
        expected: json!({
            "source": "monitor",
            "cluster_id": "c1",
            "site_id": "1",
            "rack_id": "1",
            "storageset_id": "1",
            "node_id": "srvnode-1",
            "resource_type": "node",
            "resource_status": "failed",
            "specific_info": {"generation_id": "1"},
        })
    );
    assert!(messages[0]["event_id"].is_string());
    assert!(messages[0]["timestamp"].is_i64());
}

#[tokio::test]
async fn shutdown_during_delay_stops_the_run() {
    let (bus, transport) = bus();
    let producer = bus
        .get_producer("health_event_generator", MESSAGE_TYPE, DEFAULT_PARTITIONS)
        .unwrap();
    let file = events(Some(60.0), &[("1", "online"), ("2", "offline")]);

    let count = publish_events(&producer, &context(), &file, future::ready(()))
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(published(&transport).len(), 1);
}

#[tokio::test]
async fn invalid_event_aborts_the_run() {
    let (bus, transport) = bus();
    let producer = bus
        .get_producer("health_event_generator", MESSAGE_TYPE, DEFAULT_PARTITIONS)
        .unwrap();
    let file = events(None, &[("1", "online"), ("2", "melted"), ("3", "online")]);

    let result = publish_events(&producer, &context(), &file, future::pending()).await;

    assert!(matches!(
        result,
        Err(PublisherError::Event(EventError::InvalidResourceStatus(status))) if status == "melted"
    ));
    assert_eq!(published(&transport).len(), 1);
}
