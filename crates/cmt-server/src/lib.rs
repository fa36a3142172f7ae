//! Query API and service assembly for the concurrent merkle tree mirror.
//!
//! Serves inclusion proofs, asset ownership and per-tree reconciliation
//! status over HTTP, and wires the store, ingestion pipeline and reconciler
//! into one running [`MirrorService`].

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod service;

pub use config::{MirrorConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{AppState, HealthResponse, TreeSummary};
pub use router::build_router;
pub use service::MirrorService;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber, filtered by `RUST_LOG` and
/// defaulting to `info`. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use cmt_crypto::{AuthenticatedTree, Proof};
    use cmt_ingest::{ChangeLogEvent, IngestPipeline, LeafSchemaEvent, ProgramIds};
    use cmt_store::{AssetRow, AssetStatus, InMemoryNodeStore, NodeStore, TreeRecord, WriteBatch};
    use cmt_sync::{InMemoryChain, Reconciler, SyncConfig};
    use cmt_types::{node, AccountId, Digest};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    struct Fixture {
        tree_id: AccountId,
        tree: AuthenticatedTree,
        leaf: LeafSchemaEvent,
        store: Arc<dyn NodeStore>,
    }

    /// One tree of depth 3 with a single minted leaf at seq 1.
    fn fixture() -> Fixture {
        let tree_id = AccountId::new([0x3e; 32]);
        let owner = AccountId::new([0x0a; 32]);
        let store: Arc<dyn NodeStore> = Arc::new(InMemoryNodeStore::new());
        let mut tree = AuthenticatedTree::empty(3).unwrap();
        let leaf = LeafSchemaEvent::new(tree_id, 0, owner, owner, Digest::from_hash([9; 32]));
        tree.update(0, leaf.leaf_hash).unwrap();
        let (root, path, index) = tree.change_log(0).unwrap();
        let event = ChangeLogEvent::from_path(tree_id, 1, index, root, &path);

        store
            .upsert(&WriteBatch {
                trees: vec![TreeRecord {
                    tree: tree_id,
                    max_depth: 3,
                    max_buffer_size: 8,
                    canopy_depth: 0,
                    created_slot: 1,
                }],
                nodes: event.to_rows(5),
                assets: vec![leaf.to_asset(1, AssetStatus::Active)],
            })
            .unwrap();
        Fixture {
            tree_id,
            tree,
            leaf,
            store,
        }
    }

    async fn get(app: axum::Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let f = fixture();
        let response = get(build_router(AppState::new(f.store)), "/v1/health").await;
        assert_eq!(response.status(), 200);
        let body: HealthResponse = json(response).await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn leaf_proof_by_hash() {
        let f = fixture();
        let app = build_router(AppState::new(f.store));
        let uri = format!("/v1/trees/{}/proof/leaf/{}", f.tree_id.to_hex(), f.leaf.leaf_hash.to_hex());
        let response = get(app.clone(), &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let proof: Proof = json(response).await;
        assert!(proof.verify());
        assert_eq!(proof.root, f.tree.root());
        assert_eq!(proof.index, 0);

        let unknown = format!("/v1/trees/{}/proof/leaf/{}", f.tree_id.to_hex(), Digest::from_hash([1; 32]).to_hex());
        assert_eq!(get(app.clone(), &unknown).await.status(), StatusCode::NOT_FOUND);

        let malformed = format!("/v1/trees/{}/proof/leaf/zz", f.tree_id.to_hex());
        assert_eq!(get(app, &malformed).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn node_proof_by_index() {
        let f = fixture();
        let app = build_router(AppState::new(f.store));
        let leaf_node = node::leaf_node_index(3, 0);
        let response = get(app.clone(), &format!("/v1/trees/{}/proof/node/{leaf_node}", f.tree_id.to_hex())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let proof: Proof = json(response).await;
        assert_eq!(proof.node_index, leaf_node);
        assert_eq!(proof.leaf, f.leaf.leaf_hash);

        let root = get(app.clone(), &format!("/v1/trees/{}/proof/node/1", f.tree_id.to_hex())).await;
        assert_eq!(root.status(), StatusCode::BAD_REQUEST);

        let other = AccountId::new([0x77; 32]);
        let missing = get(app, &format!("/v1/trees/{}/proof/node/{leaf_node}", other.to_hex())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn asset_lookup() {
        let f = fixture();
        let app = build_router(AppState::new(f.store));
        let response = get(app.clone(), &format!("/v1/trees/{}/assets/0", f.tree_id.to_hex())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let asset: AssetRow = json(response).await;
        assert_eq!(asset.owner, f.leaf.owner);
        assert_eq!(asset.status, AssetStatus::Active);

        let missing = get(app, &format!("/v1/trees/{}/assets/7", f.tree_id.to_hex())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tree_listing_and_status() {
        let f = fixture();
        let without = build_router(AppState::new(f.store.clone()));
        let status_uri = format!("/v1/trees/{}/status", f.tree_id.to_hex());
        assert_eq!(get(without, &status_uri).await.status(), StatusCode::NOT_FOUND);

        let pipeline = Arc::new(IngestPipeline::new(f.store.clone(), ProgramIds::default()));
        let config = SyncConfig {
            trees: vec![f.tree_id],
            ..Default::default()
        };
        let reconciler = Arc::new(Reconciler::new(Arc::new(InMemoryChain::new()), pipeline, config));
        let app = build_router(AppState::new(f.store).with_reconciler(reconciler));

        let response = get(app.clone(), &status_uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["state"], "unknown");

        let trees: Vec<TreeSummary> = json(get(app, "/v1/trees").await).await;
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].max_seq, Some(1));
        assert_eq!(trees[0].status, Some(cmt_sync::TreeStatus::Unknown));
    }
}
