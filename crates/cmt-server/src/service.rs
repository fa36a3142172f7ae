use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use cmt_ingest::{IngestHandle, IngestPipeline, IngestStats, IngestWorker};
use cmt_store::NodeStore;
use cmt_sync::{ChainDataSource, Reconciler};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::MirrorConfig;
use crate::handler::AppState;
use crate::router::build_router;

/// The assembled mirror: node store, ingestion pipeline with its live
/// worker, the reconciler poll loop, and the query API.
pub struct MirrorService {
    config: MirrorConfig,
    store: Arc<dyn NodeStore>,
    reconciler: Arc<Reconciler>,
    ingest: IngestHandle,
    ingest_task: JoinHandle<IngestStats>,
    sync_task: JoinHandle<()>,
}

impl MirrorService {
    /// Open the store and start the background tasks. Must be called from
    /// within a Tokio runtime.
    pub fn start(config: MirrorConfig, source: Arc<dyn ChainDataSource>) -> anyhow::Result<Self> {
        config.validate_for_sync()?;
        let store = config.store.open().context("opening node store")?;
        let pipeline = Arc::new(IngestPipeline::new(store.clone(), config.programs.clone()));
        let reconciler = Arc::new(Reconciler::new(source, pipeline.clone(), config.sync.clone()));

        let (ingest, ingest_task) = IngestWorker::spawn(pipeline, config.server.ingest_queue);
        let sync_task = tokio::spawn(reconciler.clone().run());
        info!(
            trees = config.sync.trees.len(),
            journal = ?config.store.path,
            "mirror service started"
        );

        Ok(Self {
            config,
            store,
            reconciler,
            ingest,
            ingest_task,
            sync_task,
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Queue for live transactions from a ledger subscription.
    pub fn ingest_handle(&self) -> IngestHandle {
        self.ingest.clone()
    }

    pub fn state(&self) -> AppState {
        AppState {
            verify_proofs: self.config.server.verify_proofs,
            ..AppState::new(self.store.clone())
        }
        .with_reconciler(self.reconciler.clone())
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> Router {
        build_router(self.state())
    }

    /// Serve the query API until the listener fails, then stop the
    /// background tasks.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.server.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "mirror API listening");
        let result = axum::serve(listener, self.router()).await;
        self.shutdown().await;
        result.context("serving mirror API")
    }

    /// Stop polling, drain the ingest queue, and return the worker's totals.
    pub async fn shutdown(self) -> IngestStats {
        let Self {
            ingest,
            ingest_task,
            sync_task,
            ..
        } = self;
        sync_task.abort();
        drop(ingest);
        let stats = ingest_task.await.unwrap_or_default();
        info!(transactions = stats.transactions, rejected = stats.rejected, "mirror service stopped");
        stats
    }
}
