//! Error types for the cache repository
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::cache::Metadata;

// == Cache Error Enum ==
/// Unified error type for the cache repository.
///
/// For every read exactly one of `Ok`, [`CacheError::NotFound`] or
/// [`CacheError::Expired`] is produced unless the engine itself fails.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No record exists for the key
    #[error("No such item: {0}")]
    NotFound(String),

    /// Record exists but is older than its TTL. Carries the stale metadata.
    #[error("Cache expired (updated at {})", .0.update_time)]
    Expired(Metadata),

    /// Backing store failure (connection, timeout, transaction, I/O)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Entity body could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CacheError {
    /// Returns true for the two "go ask the remote API" outcomes.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::NotFound(_) | CacheError::Expired(_))
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

impl From<heed::Error> for CacheError {
    fn from(err: heed::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::Expired(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Storage(_) | CacheError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache repository.
pub type Result<T> = std::result::Result<T, CacheError>;
