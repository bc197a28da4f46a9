use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kernel::ErrorReply;
use thiserror::Error;

/// Errors produced by the upload engine and the file registry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chunk {0} is missing")]
    MissingChunk(u64),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("merge already in progress for {0}")]
    MergeInProgress(String),

    #[error("metadata file {path} is corrupt: {source}")]
    CorruptMetadata {
        path: String,
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Conflict(_) | Self::MergeInProgress(_) => StatusCode::CONFLICT,
            Self::NotFound(_) | Self::MissingChunk(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::CorruptMetadata { .. } | Self::Io(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, "{self}");
        } else {
            tracing::info!(status = %status, "{self}");
        }
        let reply = ErrorReply {
            error: self.to_string(),
        };
        (status, Json(reply)).into_response()
    }
}
