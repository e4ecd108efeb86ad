//! Error types for the award relay service.
//!
//! This module defines the central `Error` enum, which captures the
//! caller-visible failure cases of the dispatcher. It implements
//! [`IntoResponse`] so HTTP handlers can return it directly with an
//! appropriate status code and a JSON `{ "error": ... }` body.
//!
//! ## Error Cases
//! - `InvalidRequest`: The caller's subject or identifier list was malformed.
//!   Rejected before any chunk is created.
//! - `ChannelError`: An internal communication failure between the dispatcher
//!   and a worker.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.
//!
//! Per-chunk failures from the external source are deliberately absent: they
//! reduce the aggregate rather than failing the batch.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the award relay service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The caller's request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::ChannelError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl Error {
    fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
