//! End-to-end subscription tests over a live WebSocket connection.

mod common;

use common::{service_with, test_config, token_for, RecordingBackend};
use futures::{SinkExt, StreamExt};
use relay_bus::{EventBus, TopicEvent};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (SocketAddr, EventBus) {
    let backend = RecordingBackend::ok(json!(null));
    let service = service_with(backend, test_config());
    let bus = service.bus();
    let router = service.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, bus)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (client, _) = connect_async(format!("ws://{addr}/subscriptions"))
        .await
        .unwrap();
    client
}

async fn send(client: &mut WsClient, frame: Value) {
    client
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();
}

async fn recv(client: &mut WsClient) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Spin until the bus shows the expected number of handlers on a topic.
async fn await_handlers(bus: &EventBus, topic: &str, expected: usize) {
    for _ in 0..200 {
        if bus.handler_count(topic) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "topic {topic}: expected {expected} handlers, found {}",
        bus.handler_count(topic)
    );
}

async fn init(client: &mut WsClient, token: Option<&str>) {
    let payload = match token {
        Some(token) => json!({ "authorization": format!("Bearer {token}") }),
        None => json!({}),
    };
    send(client, json!({ "type": "connection_init", "payload": payload })).await;
    let ack = recv(client).await;
    assert_eq!(ack["type"], "connection_ack");
}

#[tokio::test]
async fn test_subscriber_receives_only_own_events() {
    let (addr, bus) = serve().await;
    let mut client = connect(addr).await;
    init(&mut client, Some(&token_for("u1", "user"))).await;

    send(
        &mut client,
        json!({ "type": "subscribe", "id": "1", "field": "conversationCreated" }),
    )
    .await;
    await_handlers(&bus, "conversation-created", 1).await;

    bus.publish(TopicEvent::new(
        "conversation-created",
        "u2",
        json!({ "userId": "u2", "conversationId": "not-mine" }),
    ));
    bus.publish(TopicEvent::new(
        "conversation-created",
        "u1",
        json!({ "userId": "u1", "conversationId": "mine" }),
    ));

    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "next");
    assert_eq!(frame["id"], "1");
    assert_eq!(frame["payload"]["conversationId"], "mine");
}

#[tokio::test]
async fn test_complete_tears_down_the_session() {
    let (addr, bus) = serve().await;
    let mut client = connect(addr).await;
    init(&mut client, Some(&token_for("u1", "user"))).await;

    send(
        &mut client,
        json!({ "type": "subscribe", "id": "sub-a", "field": "conversationCreated" }),
    )
    .await;
    await_handlers(&bus, "conversation-created", 1).await;

    send(&mut client, json!({ "type": "complete", "id": "sub-a" })).await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "complete");
    assert_eq!(frame["id"], "sub-a");
    // The session closed when the client's frame was handled, which
    // happens before the server acknowledges; no polling needed.
    assert_eq!(bus.handler_count("conversation-created"), 0);

    // Nothing published after the acknowledgement can reach the client.
    bus.publish(TopicEvent::new(
        "conversation-created",
        "u1",
        json!({ "userId": "u1", "conversationId": "late" }),
    ));
    let late = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(late.is_err());
}

#[tokio::test]
async fn test_disconnect_tears_down_all_sessions() {
    let (addr, bus) = serve().await;
    let mut client = connect(addr).await;
    init(&mut client, Some(&token_for("u1", "user"))).await;

    send(
        &mut client,
        json!({ "type": "subscribe", "id": "1", "field": "conversationCreated" }),
    )
    .await;
    send(
        &mut client,
        json!({
            "type": "subscribe", "id": "2", "field": "messageSent",
            "args": { "conversationId": "c1" }
        }),
    )
    .await;
    await_handlers(&bus, "conversation-created", 1).await;
    await_handlers(&bus, "message-sent", 1).await;

    client.close(None).await.unwrap();
    await_handlers(&bus, "conversation-created", 0).await;
    await_handlers(&bus, "message-sent", 0).await;
}

#[tokio::test]
async fn test_message_sent_is_scoped_to_the_requested_conversation() {
    let (addr, bus) = serve().await;
    let mut client = connect(addr).await;
    init(&mut client, Some(&token_for("u1", "user"))).await;

    send(
        &mut client,
        json!({
            "type": "subscribe", "id": "m", "field": "messageSent",
            "args": { "conversationId": "c1" }
        }),
    )
    .await;
    await_handlers(&bus, "message-sent", 1).await;

    bus.publish(TopicEvent::new(
        "message-sent",
        "u1",
        json!({ "userId": "u1", "conversationId": "c2", "text": "elsewhere" }),
    ));
    bus.publish(TopicEvent::new(
        "message-sent",
        "u1",
        json!({ "userId": "u1", "conversationId": "c1", "text": "here" }),
    ));

    let frame = recv(&mut client).await;
    assert_eq!(frame["payload"]["text"], "here");
}

#[tokio::test]
async fn test_anonymous_subscribe_gets_error_frame() {
    let (addr, bus) = serve().await;
    let mut client = connect(addr).await;
    init(&mut client, None).await;

    send(
        &mut client,
        json!({ "type": "subscribe", "id": "1", "field": "conversationCreated" }),
    )
    .await;

    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["payload"]["code"], "UNAUTHENTICATED");
    assert_eq!(bus.handler_count("conversation-created"), 0);
}

#[tokio::test]
async fn test_unknown_subscription_field_gets_error_frame() {
    let (addr, _bus) = serve().await;
    let mut client = connect(addr).await;
    init(&mut client, Some(&token_for("u1", "user"))).await;

    send(
        &mut client,
        json!({ "type": "subscribe", "id": "1", "field": "nope" }),
    )
    .await;

    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["payload"]["code"], "BAD_USER_INPUT");
}

#[tokio::test]
async fn test_connection_without_init_is_closed() {
    let (addr, _bus) = serve().await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({ "type": "subscribe", "id": "1", "field": "conversationCreated" }),
    )
    .await;

    // Server refuses to proceed without the handshake.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
