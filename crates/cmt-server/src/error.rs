use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use cmt_store::StoreError;
use cmt_sync::SyncError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("tree not tracked: {0}")]
    TreeNotFound(String),

    /// The request is well formed but the mirror cannot answer it yet.
    #[error("not available: {0}")]
    NotAvailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::TreeNotFound(_)
            | ServerError::NotAvailable(_)
            | ServerError::Store(StoreError::UnknownTree(_)) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_)
            | ServerError::Store(StoreError::NotALeaf { .. })
            | ServerError::Store(StoreError::NodeOutOfRange { .. }) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
