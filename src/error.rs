//! Unified error handling for channelstream.
//!
//! This module provides the error hierarchy surfaced by API operations,
//! with HTTP status mapping and metric labeling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use channelstream_proto::api::ErrorBody;
use thiserror::Error;

// ============================================================================
// API Errors (operation processing)
// ============================================================================

/// Errors returned by the core operations.
///
/// Every variant is raised before any state is mutated. Unknown channels
/// never surface here: reports skip them and dispatch drops the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// A required field is missing or malformed.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),
}

impl ApiError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownConnection(_) => "unknown_connection",
            Self::UnknownUser(_) => "unknown_user",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownConnection(_) => StatusCode::FORBIDDEN,
            Self::UnknownUser(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
