//! Browser broadcaster.
//!
//! Live registry of SSE clients plus ordered delivery of [`RefreshMessage`]s.
//! Messages are delivered to each client in call order; a broadcast may wait
//! for the managed process and the bundler to be ready first. Waiting never
//! blocks client registration, which only touches the client map.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};

use crate::dev::RefreshMessage;
use crate::dev::coordinator::ProcessState;

/// Per-client channel capacity. A client that falls this far behind is dropped.
pub const CLIENT_BUFFER: usize = 100;

/// Client connection tracker for Server-Sent Events.
pub type ClientRegistry = RwLock<HashMap<usize, mpsc::Sender<String>>>;

/// Whether the external bundler is idle.
#[async_trait]
pub trait BundlerProbe: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// No bundler is configured; always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBundler;

#[async_trait]
impl BundlerProbe for NoBundler {
    async fn is_ready(&self) -> bool {
        true
    }
}

/// Ready when `url` answers with a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpBundlerProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpBundlerProbe {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl BundlerProbe for HttpBundlerProbe {
    async fn is_ready(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// What to wait for before delivering a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    pub wait_for_app: bool,
    pub wait_for_bundler: bool,
}

impl BroadcastOptions {
    /// Deliver immediately.
    pub const NOW: BroadcastOptions = BroadcastOptions {
        wait_for_app: false,
        wait_for_bundler: false,
    };

    /// Wait for both the managed process and the bundler.
    pub const WHEN_READY: BroadcastOptions = BroadcastOptions {
        wait_for_app: true,
        wait_for_bundler: true,
    };
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to this many clients (failing clients excluded).
    Delivered(usize),
    /// Readiness did not arrive in time; nothing was sent.
    NotReady,
}

/// Ordered fan-out of refresh messages to connected browsers.
pub struct Broadcaster {
    clients: ClientRegistry,
    next_client_id: AtomicUsize,
    order: Mutex<()>,
    app_state: RwLock<Option<watch::Receiver<ProcessState>>>,
    bundler: Arc<dyn BundlerProbe>,
    readiness_timeout: Duration,
    poll_interval: Duration,
}

impl Broadcaster {
    /// # Arguments
    ///
    /// * `bundler` - Readiness probe for the external bundler
    /// * `readiness_timeout` - Upper bound on each readiness wait
    pub fn new(bundler: Arc<dyn BundlerProbe>, readiness_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_client_id: AtomicUsize::new(0),
            order: Mutex::new(()),
            app_state: RwLock::new(None),
            bundler,
            readiness_timeout,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Follow the lifecycle of a (new) managed process.
    pub fn attach_app(&self, state: watch::Receiver<ProcessState>) {
        *self.app_state.write() = Some(state);
    }

    /// Current state of the attached process, if any.
    pub fn app_state(&self) -> Option<ProcessState> {
        self.app_state.read().as_ref().map(|rx| *rx.borrow())
    }

    /// Register a new SSE client.
    ///
    /// # Returns
    ///
    /// Client ID and receiver for serialized messages
    pub fn register_client(&self) -> (usize, mpsc::Receiver<String>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.write().insert(id, tx);
        tracing::debug!(client = id, "client connected");
        (id, rx)
    }

    pub fn unregister_client(&self, id: usize) {
        if self.clients.write().remove(&id).is_some() {
            tracing::debug!(client = id, "client disconnected");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Deliver `message` to every client, after the requested readiness waits.
    ///
    /// Calls are delivered in the order they were made, even when an earlier
    /// call is still waiting for readiness.
    pub async fn broadcast(&self, message: &RefreshMessage, options: BroadcastOptions) -> Delivery {
        let _turn = self.order.lock().await;

        let deadline = Instant::now() + self.readiness_timeout;
        if options.wait_for_app && !self.wait_for_app(deadline).await {
            tracing::warn!(message = message.kind(), "managed process not healthy in time; message dropped");
            return Delivery::NotReady;
        }
        if options.wait_for_bundler && !self.wait_for_bundler(deadline).await {
            tracing::warn!(message = message.kind(), "bundler not ready in time; message dropped");
            return Delivery::NotReady;
        }

        Delivery::Delivered(self.fan_out(message))
    }

    fn fan_out(&self, message: &RefreshMessage) -> usize {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("failed to serialize refresh message: {e}");
                return 0;
            }
        };

        let clients = self.clients.read().clone();
        let mut failed_ids = Vec::new();
        let mut delivered = 0;

        for (id, tx) in clients {
            match tx.try_send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed_ids.push(id),
            }
        }

        for id in failed_ids {
            self.unregister_client(id);
        }

        tracing::debug!(message = message.kind(), clients = delivered, "broadcast");
        delivered
    }

    async fn wait_for_app(&self, deadline: Instant) -> bool {
        let Some(mut rx) = self.app_state.read().clone() else {
            return true;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        matches!(
            tokio::time::timeout(remaining, rx.wait_for(|state| *state == ProcessState::Healthy)).await,
            Ok(Ok(_))
        )
    }

    async fn wait_for_bundler(&self, deadline: Instant) -> bool {
        loop {
            if self.bundler.is_ready().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
