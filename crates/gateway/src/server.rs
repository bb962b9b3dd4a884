//! HTTP/WebSocket surface and service lifecycle.

use crate::broker::{BrokerConsumer, BrokerSource};
use crate::context::ContextBuilder;
use crate::domain::config::{ConfigError, GatewayConfig};
use crate::domain::error::{
    ErrorClassifier, ErrorEnvelope, ErrorTracker, GatewayError, LogErrorTracker,
};
use crate::executor::{Executor, OperationRequest, OperationResponse};
use crate::ports::{BackendPort, HttpBackend};
use crate::schema::{AuthWeaver, OperationKind, RateLimitWeaver, Schema, SchemaBuilder, WeaveError};
use crate::{auth::TokenAuthenticator, modules};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use relay_bus::{EventBus, SessionCloser};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Weave(#[from] WeaveError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("startup failed: {0}")]
    Init(String),
}

struct AppState {
    executor: Executor,
    context_builder: ContextBuilder,
    classifier: Arc<ErrorClassifier>,
    schema: Arc<Schema>,
}

/// The assembled gateway: woven schema, executor, bus and router.
pub struct GatewayService {
    config: GatewayConfig,
    state: Arc<AppState>,
    bus: EventBus,
}

impl GatewayService {
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let backend = HttpBackend::new(
            config.backends.services.clone(),
            config.timeouts.downstream,
        )
        .map_err(ServerError::Init)?;
        Self::with_backend(config, Arc::new(backend), Arc::new(LogErrorTracker))
    }

    /// Build with explicit collaborators. Tests swap in doubles here.
    pub fn with_backend(
        config: GatewayConfig,
        backend: Arc<dyn BackendPort>,
        tracker: Arc<dyn ErrorTracker>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let bus = EventBus::new();
        let authenticator = Arc::new(TokenAuthenticator::new(config.auth.secret.as_bytes()));
        let context_builder = ContextBuilder::new(authenticator, bus.clone());
        let classifier = Arc::new(ErrorClassifier::new(config.production, tracker));

        let mut builder = SchemaBuilder::new();
        modules::account::register(&mut builder, backend.clone());
        modules::chat::register(&mut builder, backend, &config.limits, &config.session);

        // auth is woven last so it guards before rate limiting does.
        let rate_limit = RateLimitWeaver::new(&config.rate_limit);
        let schema = Arc::new(builder.weave(&[&rate_limit, &AuthWeaver])?);
        info!(fields = schema.len(), "Schema woven");

        let executor = Executor::new(schema.clone(), classifier.clone());
        Ok(Self {
            config,
            state: Arc::new(AppState {
                executor,
                context_builder,
                classifier,
                schema,
            }),
            bus,
        })
    }

    /// The shared fan-out bus, for wiring the broker consumer.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/operations", post(handle_operation))
            .route("/subscriptions", get(handle_subscriptions))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(self.config.timeouts.request))
            .layer(RequestBodyLimitLayer::new(self.config.limits.max_request_size))
            .with_state(self.state.clone())
    }

    /// Serve until the shutdown signal fires.
    ///
    /// Teardown order: broker ingest stops first, then the bus (so no
    /// further events can reach sessions), then the HTTP server drains.
    /// Connections still open after the grace period are closed hard;
    /// their sessions clean up through `Drop`.
    pub async fn run<S: BrokerSource + 'static>(
        self,
        source: S,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = self.config.http_addr();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "Gateway listening");

        let (consumer_stop_tx, consumer_stop_rx) = oneshot::channel();
        let consumer =
            tokio::spawn(BrokerConsumer::new(self.bus.clone()).run(source, consumer_stop_rx));

        let (server_stop_tx, server_stop_rx) = oneshot::channel::<()>();
        let router = self.router();
        let mut server = tokio::spawn(
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = server_stop_rx.await;
            })
            .into_future(),
        );

        let grace = self.config.timeouts.shutdown_grace;
        let bus = self.bus.clone();
        tokio::select! {
            _ = shutdown => {
                info!("Shutdown signal received");
                let _ = consumer_stop_tx.send(());
                let _ = consumer.await;
                bus.stop();
                let _ = server_stop_tx.send(());
                match tokio::time::timeout(grace, &mut server).await {
                    Ok(joined) => {
                        joined.map_err(|e| ServerError::Init(e.to_string()))??;
                    }
                    Err(_) => {
                        warn!(grace = ?grace, "Drain period expired, closing remaining connections");
                        server.abort();
                    }
                }
            }
            joined = &mut server => {
                // Server died on its own; still tear down in order.
                let _ = consumer_stop_tx.send(());
                let _ = consumer.await;
                bus.stop();
                joined.map_err(|e| ServerError::Init(e.to_string()))??;
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "gateway",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn handle_operation(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<OperationRequest>,
) -> Json<OperationResponse> {
    let ctx = Arc::new(state.context_builder.from_http(&headers, addr));
    Json(state.executor.execute(ctx, request).await)
}

async fn handle_subscriptions(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_loop(state, addr, socket))
}

/// Client → server subscription frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    ConnectionInit {
        #[serde(default)]
        payload: Value,
    },
    Subscribe {
        id: String,
        field: String,
        #[serde(default)]
        args: Value,
    },
    Complete {
        id: String,
    },
}

/// Server → client subscription frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    ConnectionAck,
    Next { id: String, payload: Value },
    Error { id: String, payload: ErrorEnvelope },
    Complete { id: String },
}

async fn socket_loop(state: Arc<AppState>, addr: SocketAddr, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // Handshake: the first frame must be connection_init; its payload
    // carries the credential for the whole connection.
    let init_payload = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::ConnectionInit { payload }) => break payload,
                    _ => {
                        warn!(client = %addr, "Expected connection_init, closing");
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }
    };

    let ctx = Arc::new(
        state
            .context_builder
            .from_connection_params(&init_payload, addr),
    );

    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(64);
    let writer: JoinHandle<()> = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Dropping unserializable frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if out_tx.send(ServerFrame::ConnectionAck).await.is_err() {
        writer.abort();
        return;
    }
    info!(
        client = %addr,
        correlation = %ctx.correlation,
        authenticated = ctx.identity.is_some(),
        "Subscription connection established"
    );

    let mut subscriptions: HashMap<String, (SessionCloser, JoinHandle<()>)> = HashMap::new();

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(client = %addr, error = %e, "Ignoring malformed frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match frame {
            ClientFrame::ConnectionInit { .. } => {
                debug!(client = %addr, "Ignoring duplicate connection_init");
            }
            ClientFrame::Subscribe { id, field, args } => {
                subscriptions.retain(|_, (_, handle)| !handle.is_finished());
                if subscriptions.contains_key(&id) {
                    let err = GatewayError::validation(format!("Subscription id in use: {id}"));
                    send_error(&state, &out_tx, &id, &field, &err).await;
                    continue;
                }
                match open_subscription(&state, ctx.clone(), &field, args) {
                    Ok(mut session) => {
                        let closer = session.closer();
                        let tx = out_tx.clone();
                        let sub_id = id.clone();
                        let handle = tokio::spawn(async move {
                            while let Some(event) = session.next().await {
                                let frame = ServerFrame::Next {
                                    id: sub_id.clone(),
                                    payload: event.payload,
                                };
                                if tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            let _ = tx.send(ServerFrame::Complete { id: sub_id }).await;
                        });
                        subscriptions.insert(id, (closer, handle));
                    }
                    Err(err) => send_error(&state, &out_tx, &id, &field, &err).await,
                }
            }
            ClientFrame::Complete { id } => {
                if let Some((closer, _handle)) = subscriptions.remove(&id) {
                    // Closing here unregisters the bus handler before the
                    // frame is acknowledged; the forwarder task then winds
                    // down on its own and sends the complete frame back.
                    closer.close();
                    debug!(client = %addr, subscription = %id, "Subscription completed");
                }
            }
        }
    }

    for (_, (closer, handle)) in subscriptions {
        closer.close();
        handle.abort();
    }
    drop(out_tx);
    let _ = writer.await;
    debug!(client = %addr, "Subscription connection closed");
}

fn open_subscription(
    state: &AppState,
    ctx: Arc<crate::context::ExecutionContext>,
    field_name: &str,
    args: Value,
) -> Result<relay_bus::SubscriptionSession, GatewayError> {
    let field = state
        .schema
        .field(field_name)
        .filter(|f| f.kind == OperationKind::Subscription)
        .ok_or_else(|| {
            GatewayError::validation_field(
                format!("Unknown subscription field: {field_name}"),
                "field",
            )
        })?;
    let subscribe = field
        .subscribe
        .as_ref()
        .ok_or_else(|| GatewayError::internal(format!("{field_name} has no subscribe fn")))?;
    subscribe(ctx, args)
}

async fn send_error(
    state: &AppState,
    tx: &mpsc::Sender<ServerFrame>,
    id: &str,
    field: &str,
    err: &GatewayError,
) {
    let envelope = state.classifier.report(err, Some(field));
    let _ = tx
        .send(ServerFrame::Error {
            id: id.to_string(),
            payload: envelope,
        })
        .await;
}
