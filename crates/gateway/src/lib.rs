//! HTTP and WebSocket gateway for ragchat.
//!
//! Routes:
//! - `GET /health`: health snapshot; 503 when unhealthy
//! - `GET /metrics`: grouped metrics summary
//! - `GET /chat`: WebSocket, one [`ChatSession`] per connection
//!
//! Built on Axum. Every connection shares one [`ServingPipeline`], so the
//! cache, metrics, and admission limit are process-wide.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json},
    routing::get,
};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use ragchat_config::GatewayConfig;
use ragchat_serving::{ChatSession, ServingPipeline, SessionEvent};
use ragchat_telemetry::{HealthMonitor, HealthStatus, MetricsSummary};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

const INBOUND_BUFFER: usize = 8;
const OUTBOUND_BUFFER: usize = 64;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub pipeline: Arc<ServingPipeline>,
    pub health: Arc<HealthMonitor>,
    /// Browser origin allowed by CORS. `None` allows no cross-origin calls.
    pub allowed_origin: Option<String>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));
    let cors = match state
        .allowed_origin
        .as_deref()
        .and_then(|origin| origin.parse::<HeaderValue>().ok())
    {
        Some(origin) => cors.allow_origin(origin),
        None => cors,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/chat", get(ws_handler))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: &GatewayConfig, state: SharedState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Health & metrics ──────────────────────────────────────────────────────

/// Computed per request from live metrics; never cached.
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let status = match snapshot.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(snapshot))
}

async fn metrics_handler(State(state): State<SharedState>) -> Json<MetricsSummary> {
    Json(state.health.summary())
}

// ── WebSocket ─────────────────────────────────────────────────────────────

/// `GET /chat`: inbound text frames are raw utterances; outbound frames are
/// JSON [`SessionEvent`]s.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let span = info_span!("ws", connection = %Uuid::new_v4());
    async move {
        info!("WebSocket connection established");

        let (sink, stream) = socket.split();
        let incoming = stream
            .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, WsMessage::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(WsMessage::Text(text)) => Some(text.as_str().to_owned()),
                    _ => None, // binary, ping, pong
                })
            });
        let outgoing =
            sink.with(|json: String| future::ready(Ok::<_, axum::Error>(WsMessage::Text(json.into()))));

        bridge(state.pipeline.clone(), incoming, outgoing).await;
        info!("WebSocket connection closed");
    }
    .instrument(span)
    .await
}

/// Run one chat session between a stream of utterances and a sink of JSON
/// event frames.
///
/// The end of `incoming` is a disconnect: the session is cancelled even if
/// a turn is in flight. A failing `outgoing` sink ends the session the
/// same way.
pub async fn bridge<I, O>(pipeline: Arc<ServingPipeline>, incoming: I, outgoing: O)
where
    I: Stream<Item = String> + Send + Unpin + 'static,
    O: Sink<String> + Send + Unpin + 'static,
{
    let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);
    let (out_tx, out_rx) = mpsc::channel::<SessionEvent>(OUTBOUND_BUFFER);

    let session = tokio::spawn(ChatSession::new(pipeline).run(in_rx, out_tx).in_current_span());
    let mut writer = tokio::spawn(write_events(out_rx, outgoing).in_current_span());
    let mut reader = tokio::spawn(read_messages(incoming, in_tx).in_current_span());

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    // With the writer gone the session sees its outbound side close.
    if let Err(e) = session.await {
        warn!("Session task failed: {e}");
    }
}

async fn read_messages<I>(mut incoming: I, in_tx: mpsc::Sender<String>)
where
    I: Stream<Item = String> + Unpin,
{
    while let Some(text) = incoming.next().await {
        if in_tx.send(text).await.is_err() {
            break;
        }
    }
}

async fn write_events<O>(mut out_rx: mpsc::Receiver<SessionEvent>, mut outgoing: O)
where
    O: Sink<String> + Unpin,
{
    while let Some(event) = out_rx.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(event = event.event_type(), "Dropping unserializable event: {e}");
                continue;
            }
        };
        if outgoing.send(json).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use ragchat_core::error::{ProviderError, RetrievalError};
    use ragchat_core::provider::{CompletionRequest, InferenceEngine};
    use ragchat_core::retriever::{RetrievedPassage, Retriever};
    use ragchat_telemetry::{FixedSampler, ResourceSample};
    use tower::ServiceExt;

    struct FixedEngine;

    #[async_trait]
    impl InferenceEngine for FixedEngine {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
            Ok("Employees get 15 days.".into())
        }
    }

    struct FixedRetriever;

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
            Ok(vec![
                RetrievedPassage::new("Vacation: 15 days per year.", 0).with_source("handbook.md#0"),
            ])
        }
    }

    fn test_state() -> SharedState {
        let pipeline = Arc::new(ServingPipeline::new(Arc::new(FixedRetriever), Arc::new(FixedEngine)));
        let health = Arc::new(HealthMonitor::new(
            pipeline.metrics().clone(),
            Box::new(FixedSampler(ResourceSample {
                memory_mb: 64.0,
                cpu_percent: 1.0,
            })),
            1000.0,
        ));
        Arc::new(GatewayState {
            pipeline,
            health,
            allowed_origin: Some("http://127.0.0.1:8000".into()),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_reports_healthy() {
        let (status, json) = get_json(build_router(test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["success_rate"], 100.0);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn health_endpoint_returns_503_when_unhealthy() {
        let state = test_state();
        let metrics = state.pipeline.metrics();
        metrics.record_request(true, 1.0, None);
        metrics.record_request(false, 1.0, Some("RetryExhausted"));
        metrics.record_request(false, 1.0, Some("RetryExhausted"));

        let (status, json) = get_json(build_router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["error_counts"]["RetryExhausted"], 2);
    }

    #[tokio::test]
    async fn metrics_endpoint_groups_sections() {
        let state = test_state();
        state.pipeline.metrics().record_cache_event(true);

        let (status, json) = get_json(build_router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cache"]["hits"], 1);
        assert_eq!(json["performance"]["memory_usage_mb"], 64.0);
        assert!(json["requests"]["total"].is_u64());
    }

    #[tokio::test]
    async fn chat_route_exists() {
        // oneshot cannot complete a WebSocket handshake; the route must still resolve.
        let app = build_router(test_state());
        let req = Request::builder().uri("/chat").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/v1/chat").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    async fn next_event(rx: &mut futures::channel::mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let frame = rx.next().await.expect("frame");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn bridge_speaks_json_events() {
        let state = test_state();
        let (client_tx, incoming) = futures::channel::mpsc::unbounded::<String>();
        let (outgoing, mut client_rx) = futures::channel::mpsc::unbounded::<String>();
        let handle = tokio::spawn(bridge(state.pipeline.clone(), incoming, outgoing));

        assert_eq!(next_event(&mut client_rx).await["type"], "ready");

        client_tx.unbounded_send("".into()).unwrap();
        assert_eq!(next_event(&mut client_rx).await["type"], "rejected");

        client_tx.unbounded_send("What is the vacation policy?".into()).unwrap();
        let chunk = next_event(&mut client_rx).await;
        assert_eq!(chunk["type"], "chunk");
        assert_eq!(chunk["content"], "Employees get 15 days.");
        let done = next_event(&mut client_rx).await;
        assert_eq!(done["type"], "done");
        assert_eq!(done["sources"][0], "handbook.md#0");

        drop(client_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("bridge ends after disconnect")
            .unwrap();
        assert_eq!(state.pipeline.admission().in_flight(), 0);
    }
}
