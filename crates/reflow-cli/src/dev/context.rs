//! Per-verdict reconciliation context.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::dev::style::StylePayload;
use crate::error::BuildError;

/// Flags and shared state threaded through one verdict's reconciliation.
///
/// Verdicts reconciled as part of a multi-event batch share one context
/// (cloned), so the toolchain compile, the style rebuild and the asset build
/// each run at most once per batch.
#[derive(Debug, Clone)]
pub struct ReconciliationContext {
    /// Restarts and the final refresh message are left to the batch.
    pub is_part_of_batch: bool,
    compile: Arc<OnceCell<Result<(), BuildError>>>,
    styles: Arc<OnceCell<Result<StylePayload, BuildError>>>,
    asset_build: Arc<OnceCell<Result<(), BuildError>>>,
}

impl ReconciliationContext {
    /// Context for a batch holding a single verdict.
    pub fn standalone() -> Self {
        Self {
            is_part_of_batch: false,
            compile: Arc::new(OnceCell::new()),
            styles: Arc::new(OnceCell::new()),
            asset_build: Arc::new(OnceCell::new()),
        }
    }

    /// Context shared by every verdict of a multi-event batch.
    pub fn batch() -> Self {
        Self {
            is_part_of_batch: true,
            compile: Arc::new(OnceCell::new()),
            styles: Arc::new(OnceCell::new()),
            asset_build: Arc::new(OnceCell::new()),
        }
    }

    /// Run `compile` unless another verdict of this context already did, and
    /// return the shared result.
    pub async fn compile_once<F>(&self, compile: F) -> Result<(), BuildError>
    where
        F: Future<Output = Result<(), BuildError>>,
    {
        self.compile.get_or_init(|| compile).await.clone()
    }

    /// Rebuild the style bundles once per context; every style verdict gets
    /// the same payload.
    pub async fn styles_once<F>(&self, rebuild: F) -> Result<StylePayload, BuildError>
    where
        F: Future<Output = Result<StylePayload, BuildError>>,
    {
        self.styles.get_or_init(|| rebuild).await.clone()
    }

    /// Same as [`compile_once`](Self::compile_once), for the declared asset build.
    pub async fn asset_build_once<F>(&self, build: F) -> Result<(), BuildError>
    where
        F: Future<Output = Result<(), BuildError>>,
    {
        self.asset_build.get_or_init(|| build).await.clone()
    }

    pub fn has_compiled(&self) -> bool {
        self.compile.initialized()
    }
}
