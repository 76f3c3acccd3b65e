//! HTTP handlers for the Concierge server.
//!
//! Every subscription route opens one Server-Sent Events stream. The stream's
//! body owns the hub subscription, so a client disconnect drops the body and
//! unregisters the channel.

use crate::config::Config;
use crate::metrics::{self, StreamMetricsGuard};
use crate::notifier::HotelNotifier;
use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use concierge_core::{Hub, HubStats, ParseTopicError, RegistryError, Subscription, TopicClass};
use concierge_protocol::CONTENT_TYPE;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The update hub.
    pub hub: Arc<Hub>,
    /// Hotel change notifications.
    pub notifier: HotelNotifier,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state around an existing hub.
    #[must_use]
    pub fn new(hub: Arc<Hub>, config: Config) -> Self {
        Self {
            notifier: HotelNotifier::new(hub.clone()),
            hub,
            config,
        }
    }
}

/// Errors returned to subscribing clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The hub refused the subscription.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The path named no topic class.
    #[error(transparent)]
    UnknownTopic(#[from] ParseTopicError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Registry(RegistryError::CapacityReached(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Registry(RegistryError::CapacityReached(_)) => "capacity",
            Self::Registry(_) => "target",
            Self::UnknownTopic(_) => "topic",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(self.kind());
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Optional target for the generic subscription route.
#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    target: Option<String>,
}

/// Run the HTTP server until ctrl-c.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    let hub_config = config.hub.to_hub_config();
    let hub = Arc::new(Hub::start(hub_config.clone()));
    let state = Arc::new(AppState::new(hub.clone(), config.clone()));

    let gauges = config
        .metrics
        .enabled
        .then(|| metrics::spawn_gauge_refresh(hub.clone(), hub_config.sweeper.interval));

    let app = router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Concierge server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    if let Some(gauges) = gauges {
        gauges.abort();
    }

    info!("Concierge server stopped");
    Ok(())
}

/// Wait for ctrl-c, then end every open stream so connections can drain.
async fn shutdown_signal(hub: Arc<Hub>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }

    let channels = hub.registry().channels();
    info!(streams = channels.len(), "Shutting down, closing streams");
    for channel in channels {
        hub.registry().unregister_client(channel.id());
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/guest/:guest_id/sse/updates", get(guest_updates))
        .route("/api/v1/sessions/:session_id/sse/updates", get(session_updates))
        .route("/api/v1/sse/system-updates", get(global_updates))
        .route("/api/v1/rooms/sse/status-updates", get(global_updates))
        .route("/api/v1/sse/stats", get(stats_handler))
        .route("/api/v1/sse/:topic", get(topic_updates))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<HubStats> {
    Json(state.hub.stats())
}

async fn guest_updates(
    State(state): State<Arc<AppState>>,
    Path(guest_id): Path<String>,
) -> Result<Response, ApiError> {
    open_stream(&state, TopicClass::Entity, Some(&guest_id))
}

async fn session_updates(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    open_stream(&state, TopicClass::Session, Some(&session_id))
}

async fn global_updates(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    open_stream(&state, TopicClass::Global, None)
}

async fn topic_updates(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Response, ApiError> {
    let topic: TopicClass = topic.parse()?;
    open_stream(&state, topic, query.target.as_deref())
}

/// Subscribe and wrap the subscription in a streaming response.
///
/// Frames leave the hub already encoded as complete SSE blocks, shared by
/// every subscriber of the event, so they are written to the body as is.
fn open_stream(
    state: &AppState,
    topic: TopicClass,
    target: Option<&str>,
) -> Result<Response, ApiError> {
    let subscription = state.hub.subscribe(topic, target).map_err(|e| {
        warn!(topic = %topic, target = ?target, error = %e, "Subscription rejected");
        e
    })?;

    debug!(client = %subscription.id(), topic = %topic, target = ?target, "Stream opened");
    let guard = StreamMetricsGuard::new(topic, state.hub.clone());

    let headers = [
        (header::CONTENT_TYPE, CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];

    Ok((headers, Body::from_stream(frame_stream(subscription, guard))).into_response())
}

/// Body stream over a subscription.
///
/// The state tuple drops the subscription before its metrics guard, so the
/// guard observes the channel already unregistered.
fn frame_stream(
    subscription: Subscription,
    guard: StreamMetricsGuard,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold((subscription, guard), |(subscription, guard)| async move {
        let frame = subscription.next_frame().await?;
        Some((Ok(frame), (subscription, guard)))
    })
}
