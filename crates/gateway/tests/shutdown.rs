//! Service lifecycle: ordered teardown on the shutdown signal.

mod common;

use common::{service_with, test_config, RecordingBackend};
use relay_gateway::broker::{BrokerMessage, ChannelSource, CONVERSATION_CREATED};
use relay_bus::TopicEvent;
use serde_json::json;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

#[tokio::test]
async fn test_shutdown_stops_consumer_and_bus() {
    let mut config = test_config();
    config.http.port = 0; // ephemeral
    let backend = RecordingBackend::ok(json!(null));
    let service = service_with(backend, config);
    let bus = service.bus();

    let (ingest_tx, source) = ChannelSource::new(8);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let running = tokio::spawn(service.run(source, shutdown_rx));

    // Give the service a beat to bind and start the consumer, and prove
    // ingest is live before the signal.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ingest_tx
        .send(BrokerMessage {
            topic: CONVERSATION_CREATED.to_string(),
            payload: json!({ "userId": "u1", "conversationId": "c1" }),
        })
        .await
        .unwrap();

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(10), running)
        .await
        .expect("service did not stop in time")
        .unwrap()
        .unwrap();

    // The bus was stopped during teardown: publishing reaches nobody.
    let reached = bus.publish(TopicEvent::new(
        CONVERSATION_CREATED,
        "u1",
        json!({ "userId": "u1" }),
    ));
    assert_eq!(reached, 0);
}
