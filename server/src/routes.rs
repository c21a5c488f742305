//! HTTP route handlers for the kanbantime timer core.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /messages` - One message of the timer core's interface
//! - `GET /ws` - WebSocket stream of timer notifications
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (including the client token)
//! - The [`TrackerService`] owning all timer state
//! - The notification broadcaster feeding WebSocket clients
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kanbantime_server::broadcast::TimerBroadcaster;
//! use kanbantime_server::config::Config;
//! use kanbantime_server::persistence::JsonFileStore;
//! use kanbantime_server::routes::{create_router, AppState};
//! use kanbantime_server::tracker::TrackerService;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let kv = Arc::new(JsonFileStore::open(&config.data_dir).expect("data dir"));
//!     let broadcaster = TimerBroadcaster::new();
//!     let tracker = TrackerService::load(kv, broadcaster.clone(), chrono::Utc::now())
//!         .await
//!         .expect("load state");
//!     let app = create_router(AppState::new(config, Arc::new(tracker), broadcaster));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:7421").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use crate::auth::{bearer_token, validate_token};
use crate::broadcast::TimerBroadcaster;
use crate::config::Config;
use crate::error::ServerError;
use crate::messages::{Request, Response};
use crate::tracker::TrackerService;

// ============================================================================
// Constants
// ============================================================================

/// Maximum body size of one message (64 KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Owner of all timer state.
    pub tracker: Arc<TrackerService>,

    /// Timer notifications for WebSocket clients.
    pub broadcaster: TimerBroadcaster,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// `broadcaster` must be the one the tracker publishes on.
    #[must_use]
    pub fn new(config: Config, tracker: Arc<TrackerService>, broadcaster: TimerBroadcaster) -> Self {
        Self {
            config: Arc::new(config),
            tracker,
            broadcaster,
            start_time: Instant::now(),
        }
    }

    /// Checks a client token unless authentication is disabled.
    fn authorize(&self, provided: Option<&str>) -> Result<(), ServerError> {
        if self.config.unsafe_no_auth {
            return Ok(());
        }
        let Some(expected) = self.config.token.as_deref() else {
            error!("Token not configured but auth is enabled");
            return Err(ServerError::internal("server configuration error"));
        };
        validate_token(provided.unwrap_or_default(), expected).map_err(|err| {
            debug!(error = %err, "Client token rejected");
            ServerError::from(err)
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("tracker", &self.tracker)
            .field("broadcaster", &self.broadcaster)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/messages", post(post_message))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// POST /messages - Message Interface
// ============================================================================

/// POST /messages - Handle one message.
///
/// # Authentication
///
/// Unless `unsafe_no_auth` is enabled, requires `Authorization: Bearer <token>`.
///
/// # Responses
///
/// - `200 OK` - The message's response as JSON
/// - `400 Bad Request` - Malformed JSON or unknown message type
/// - `401 Unauthorized` - Missing or wrong token
async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Response>, ServerError> {
    state.authorize(bearer_token(&headers))?;

    let request: Request = serde_json::from_slice(&body).map_err(|err| {
        debug!(error = %err, "Failed to parse message");
        ServerError::validation(format!("invalid message: {err}"))
    })?;

    let kind = request.kind();
    trace!(kind, "Handling message");
    let response = state.tracker.handle(request).await;
    debug!(kind, "Message handled");

    Ok(Json(response))
}

// ============================================================================
// GET /ws - Timer Notifications
// ============================================================================

/// Query parameters for the notification stream.
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    /// Authentication token (required unless unsafe_no_auth is enabled).
    pub token: Option<String>,
}

/// GET /ws - WebSocket stream of [`TimerNotification`](crate::broadcast::TimerNotification)s.
///
/// The server sends one JSON text message per notification and ignores
/// anything the client sends.
async fn get_ws(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    ws: WebSocketUpgrade,
) -> HttpResponse {
    if let Err(err) = state.authorize(params.token.as_deref()) {
        return err.into_response();
    }

    info!("WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_websocket(socket, state.broadcaster))
}

/// Forwards notifications to an established WebSocket connection.
async fn handle_websocket(socket: axum::extract::ws::WebSocket, broadcaster: TimerBroadcaster) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut notifications = broadcaster.subscribe();

    info!("WebSocket client connected");

    let forward_task = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => match serde_json::to_string(&notification) {
                    Ok(json) => {
                        if let Err(err) = sender.send(Message::Text(json.into())).await {
                            debug!(error = %err, "Failed to send notification to WebSocket client");
                            break;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to serialize notification");
                    }
                },
                Err(RecvError::Lagged(count)) => {
                    warn!(skipped = count, "WebSocket client lagged, skipped notifications");
                }
                Err(RecvError::Closed) => {
                    debug!("Notification broadcaster closed");
                    break;
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %ServerError::websocket(err.to_string()), "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    info!("WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" if responding.
    pub status: String,

    /// Number of running timers.
    pub active_timers: usize,

    /// Number of connected notification clients.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - No authentication required.
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_timers: state.tracker.active_timer_count().await,
        connections: state.broadcaster.subscriber_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
