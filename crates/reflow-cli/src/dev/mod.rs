//! Development orchestrator.
//!
//! Watches the project tree, decides what each change implies and performs
//! the minimum rebuild work:
//! - Event classification and per-tick batching
//! - On-change hooks by timing strategy
//! - Managed process kill, rebuild, relaunch and health polling
//! - Refresh messages to browsers via Server-Sent Events

pub mod batch;
pub mod broadcaster;
pub mod classifier;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod event;
pub mod hooks;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod style;
pub mod watcher;

// Re-exports
pub use batch::EventBatch;
pub use broadcaster::{
    BroadcastOptions, Broadcaster, BundlerProbe, Delivery, HttpBundlerProbe, NoBundler,
};
pub use classifier::{Classification, EventClassifier, Verdict};
pub use config::DevConfig;
pub use context::ReconciliationContext;
pub use coordinator::{BuildCoordinator, CommandToolchain, ManagedApp, ProcessState, Toolchain};
pub use event::{OpFlags, RawEvent};
pub use hooks::{HookExecutor, HookInvocation, ShellExecutor};
pub use orchestrator::{Collaborators, CycleOutcome, Orchestrator, RestartReason};
pub use registry::{MatchedRule, RuleId, WatchRegistry};
pub use server::{DevServer, ServerState};
pub use style::{StyleGraph, StyleKind, StylePayload, StyleSubsystem};
pub use watcher::{FileWatcher, WatchSet};

use serde::{Deserialize, Serialize};

/// Messages pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshMessage {
    /// A rebuild started; clients may show a pending indicator.
    Rebuilding,

    /// Reload the page.
    HardReload,

    /// Replace styles in place.
    StyleHotSwap {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        critical_css_base64: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        non_critical_css_url: Option<String>,
    },

    /// Run the page's revalidation callback instead of reloading.
    ClientRevalidate,
}

impl RefreshMessage {
    pub fn style_hot_swap(payload: StylePayload) -> Self {
        RefreshMessage::StyleHotSwap {
            critical_css_base64: payload.critical_css_base64,
            non_critical_css_url: payload.non_critical_css_url,
        }
    }

    /// Wire name of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshMessage::Rebuilding => "rebuilding",
            RefreshMessage::HardReload => "hard_reload",
            RefreshMessage::StyleHotSwap { .. } => "style_hot_swap",
            RefreshMessage::ClientRevalidate => "client_revalidate",
        }
    }
}
