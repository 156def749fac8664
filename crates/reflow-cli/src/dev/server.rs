//! Development server: refresh messages via Server-Sent Events.
//!
//! Serves the SSE stream, the reload client script, the latest style bundles
//! and a small status endpoint. Pages of the managed app include
//! `/__reflow/client.js` themselves.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::get,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tower_http::cors::{Any, CorsLayer};

use crate::dev::broadcaster::Broadcaster;
use crate::dev::coordinator::ProcessState;
use crate::dev::style::{StyleKind, StyleSubsystem};
use crate::error::{CliError, Result};

/// Path of the SSE endpoint.
pub const EVENTS_PATH: &str = "/__reflow/events";

/// Path of the reload client script.
pub const CLIENT_PATH: &str = "/__reflow/client.js";

pub const STATUS_PATH: &str = "/__reflow/status";

const RELOAD_SCRIPT: &str = include_str!("../../assets/dev/reload-client.js");

/// State shared by the handlers. Survives full restarts: only the style
/// subsystem is swapped.
pub struct ServerState {
    broadcaster: Arc<Broadcaster>,
    styles: RwLock<Arc<dyn StyleSubsystem>>,
}

impl ServerState {
    pub fn new(broadcaster: Arc<Broadcaster>, styles: Arc<dyn StyleSubsystem>) -> Self {
        Self {
            broadcaster,
            styles: RwLock::new(styles),
        }
    }

    /// Serve bundles of a new style subsystem (after a full restart).
    pub fn set_styles(&self, styles: Arc<dyn StyleSubsystem>) {
        *self.styles.write() = styles;
    }

    fn bundle(&self, kind: StyleKind) -> Option<String> {
        let styles = Arc::clone(&self.styles.read());
        styles.bundle(kind)
    }
}

/// Development server.
pub struct DevServer {
    addr: SocketAddr,
    public_path: String,
    state: Arc<ServerState>,
}

impl DevServer {
    /// # Arguments
    ///
    /// * `addr` - Address to bind
    /// * `public_path` - URL prefix of the style bundles
    /// * `state` - Shared handler state
    pub fn new(addr: SocketAddr, public_path: &str, state: Arc<ServerState>) -> Self {
        Self {
            addr,
            public_path: public_path.trim_end_matches('/').to_string(),
            state,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Bind and serve until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn start(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| CliError::Server(format!("Failed to bind to {}: {}", self.addr, e)))?;

        let router = self.router();
        axum::serve(listener, router)
            .await
            .map_err(|e| CliError::Server(format!("Server error: {}", e)))
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route(EVENTS_PATH, get(handle_events))
            .route(CLIENT_PATH, get(handle_client_script))
            .route(STATUS_PATH, get(handle_status))
            .route(
                &format!("{}/critical.css", self.public_path),
                get(handle_critical_css),
            )
            .route(
                &format!("{}/non-critical.css", self.public_path),
                get(handle_non_critical_css),
            )
            .layer(
                // Pages are served by the managed process on another origin.
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(Arc::clone(&self.state))
    }
}

/// Unregisters its client when axum drops the response stream.
struct ClientStream {
    id: usize,
    broadcaster: Arc<Broadcaster>,
    inner: ReceiverStream<String>,
}

impl Stream for ClientStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.broadcaster.unregister_client(self.id);
    }
}

async fn handle_events(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (id, rx) = state.broadcaster.register_client();
    let stream = ClientStream {
        id,
        broadcaster: Arc::clone(&state.broadcaster),
        inner: ReceiverStream::new(rx),
    }
    .map(|data| Ok(Event::default().data(data)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

async fn handle_client_script() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        RELOAD_SCRIPT,
    )
}

#[derive(Debug, Serialize)]
struct Status {
    state: Option<ProcessState>,
    clients: usize,
}

async fn handle_status(State(state): State<Arc<ServerState>>) -> Json<Status> {
    Json(Status {
        state: state.broadcaster.app_state(),
        clients: state.broadcaster.client_count(),
    })
}

async fn handle_critical_css(State(state): State<Arc<ServerState>>) -> Response {
    css_response(state.bundle(StyleKind::Critical))
}

async fn handle_non_critical_css(State(state): State<Arc<ServerState>>) -> Response {
    css_response(state.bundle(StyleKind::NonCritical))
}

fn css_response(bundle: Option<String>) -> Response {
    match bundle {
        Some(css) => (
            [
                (header::CONTENT_TYPE, "text/css; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            css,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
