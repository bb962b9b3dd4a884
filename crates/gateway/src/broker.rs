//! Bridge from the external event broker into the in-process fan-out bus.
//!
//! The consumer task is the single reader of the broker feed: it decodes
//! each record, stamps out a [`TopicEvent`] and publishes it on the bus.
//! Subscription sessions never talk to the broker directly.

use async_trait::async_trait;
use relay_bus::{EventBus, TopicEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Broadcast when a conversation is created for a participant.
pub const CONVERSATION_CREATED: &str = "conversation-created";
/// Broadcast when a message lands in a conversation.
pub const MESSAGE_SENT: &str = "message-sent";

/// Topics the gateway consumes. Records on other topics are dropped.
pub const TOPICS: &[&str] = &[CONVERSATION_CREATED, MESSAGE_SENT];

/// One record off the broker feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Value,
}

/// Source of broker records. The TCP source is the production path; the
/// channel source backs tests and local runs without a broker.
#[async_trait]
pub trait BrokerSource: Send {
    /// Next record, or `None` when the source is exhausted for good.
    async fn next_message(&mut self) -> Option<BrokerMessage>;
}

/// In-process source fed through an mpsc channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<BrokerMessage>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<BrokerMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl BrokerSource for ChannelSource {
    async fn next_message(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }
}

/// Newline-delimited JSON over TCP, with reconnect on any stream failure.
pub struct TcpSource {
    addr: SocketAddr,
    reconnect_backoff: Duration,
    reader: Option<BufReader<TcpStream>>,
}

impl TcpSource {
    pub fn new(addr: SocketAddr, reconnect_backoff: Duration) -> Self {
        Self {
            addr,
            reconnect_backoff,
            reader: None,
        }
    }

    /// Dial until a connection sticks; the backoff paces retries.
    async fn connect(&self) -> BufReader<TcpStream> {
        loop {
            match TcpStream::connect(self.addr).await {
                Ok(stream) => {
                    info!(addr = %self.addr, "Connected to event broker");
                    return BufReader::new(stream);
                }
                Err(e) => {
                    warn!(addr = %self.addr, error = %e, "Broker connection failed, retrying");
                    tokio::time::sleep(self.reconnect_backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl BrokerSource for TcpSource {
    async fn next_message(&mut self) -> Option<BrokerMessage> {
        loop {
            // Take the reader out; it only goes back after a clean read,
            // so every failure path naturally reconnects next pass.
            let mut reader = match self.reader.take() {
                Some(reader) => reader,
                None => self.connect().await,
            };
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    warn!("Broker stream closed, reconnecting");
                    tokio::time::sleep(self.reconnect_backoff).await;
                }
                Ok(_) => {
                    self.reader = Some(reader);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<BrokerMessage>(line) {
                        Ok(message) => return Some(message),
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed broker record");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Broker read failed, reconnecting");
                    tokio::time::sleep(self.reconnect_backoff).await;
                }
            }
        }
    }
}

/// Drains a source into the bus until shutdown or source exhaustion.
pub struct BrokerConsumer {
    bus: EventBus,
}

impl BrokerConsumer {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub async fn run<S: BrokerSource>(self, mut source: S, mut shutdown: oneshot::Receiver<()>) {
        info!(topics = ?TOPICS, "Broker consumer started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Broker consumer shutting down");
                    break;
                }
                message = source.next_message() => {
                    match message {
                        Some(message) => self.dispatch(message),
                        None => {
                            info!("Broker source exhausted, consumer stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, message: BrokerMessage) {
        if !TOPICS.contains(&message.topic.as_str()) {
            debug!(topic = %message.topic, "Ignoring record on unconsumed topic");
            return;
        }
        let owner_id = match message.payload.get("userId").and_then(Value::as_str) {
            Some(owner) => owner.to_string(),
            None => {
                warn!(topic = %message.topic, "Skipping record without userId");
                return;
            }
        };
        let reached = self.bus.publish(TopicEvent {
            topic: message.topic.clone(),
            owner_id,
            payload: message.payload,
        });
        debug!(topic = %message.topic, handlers = reached, "Dispatched broker record");
    }
}
