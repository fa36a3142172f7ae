use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use cmt_crypto::Proof;
use cmt_store::{AssetRow, NodeStore, ProofGenerator};
use cmt_sync::{Reconciler, TreeStatus};
use cmt_types::{AccountId, Digest, NodeIndex, Seq};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NodeStore>,
    /// Absent when the service runs without a reconciler.
    pub reconciler: Option<Arc<Reconciler>>,
    pub verify_proofs: bool,
}

impl AppState {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self {
            store,
            reconciler: None,
            verify_proofs: true,
        }
    }

    pub fn with_reconciler(mut self, reconciler: Arc<Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    fn status(&self, tree: &AccountId) -> Option<TreeStatus> {
        self.reconciler.as_ref().and_then(|r| r.status(tree))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeSummary {
    pub tree: AccountId,
    pub max_depth: u32,
    pub max_buffer_size: u32,
    pub max_seq: Option<Seq>,
    pub status: Option<TreeStatus>,
}

fn parse_tree(s: &str) -> ServerResult<AccountId> {
    s.parse()
        .map_err(|e| ServerError::BadRequest(format!("tree id {s}: {e}")))
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

pub async fn trees_handler(State(state): State<AppState>) -> ServerResult<Json<Vec<TreeSummary>>> {
    let mut out = Vec::new();
    for record in state.store.trees()? {
        out.push(TreeSummary {
            tree: record.tree,
            max_depth: record.max_depth,
            max_buffer_size: record.max_buffer_size,
            max_seq: state.store.max_sequence(&record.tree)?.map(|s| s.seq),
            status: state.status(&record.tree),
        });
    }
    Ok(Json(out))
}

/// Proof for the leaf currently holding `hash`.
pub async fn leaf_proof_handler(
    State(state): State<AppState>,
    Path((tree, hash)): Path<(String, String)>,
) -> ServerResult<Json<Proof>> {
    let tree = parse_tree(&tree)?;
    let hash = Digest::from_hex(&hash).map_err(|e| ServerError::BadRequest(format!("leaf hash: {e}")))?;
    ProofGenerator::proof_for_leaf_hash(&*state.store, &tree, &hash)?
        .map(Json)
        .ok_or_else(|| ServerError::NotAvailable(format!("proof for leaf {} in tree {tree}", hash.short_hex())))
}

/// Proof for a leaf addressed by complete-tree node index.
pub async fn node_proof_handler(
    State(state): State<AppState>,
    Path((tree, node_index)): Path<(String, NodeIndex)>,
) -> ServerResult<Json<Proof>> {
    let tree = parse_tree(&tree)?;
    ProofGenerator::generate_proof(&*state.store, &tree, node_index, None, state.verify_proofs)?
        .map(Json)
        .ok_or_else(|| ServerError::NotAvailable(format!("proof for node {node_index} in tree {tree}")))
}

pub async fn asset_handler(
    State(state): State<AppState>,
    Path((tree, nonce)): Path<(String, u64)>,
) -> ServerResult<Json<AssetRow>> {
    let tree = parse_tree(&tree)?;
    state
        .store
        .asset(&tree, nonce)?
        .map(Json)
        .ok_or_else(|| ServerError::NotAvailable(format!("asset {nonce} in tree {tree}")))
}

pub async fn status_handler(
    State(state): State<AppState>,
    Path(tree): Path<String>,
) -> ServerResult<Json<TreeStatus>> {
    let tree = parse_tree(&tree)?;
    state
        .status(&tree)
        .map(Json)
        .ok_or_else(|| ServerError::TreeNotFound(tree.to_hex()))
}
