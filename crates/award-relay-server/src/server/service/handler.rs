//! HTTP front end for batched award lookups.
//!
//! This module defines [`AwardService`], which maps
//! `POST /api/badges/{subject}` onto [`Dispatcher::process`]. The request body
//! is a comma-separated list of badge identifiers; the response is a
//! [`BatchResponse`].
//!
//! ## Responsibilities
//!
//! - Parse and validate the subject and identifier list before anything is
//!   dispatched.
//! - Report liveness on `GET /health`, flipping to 503 once shutdown begins.
//! - Hand graceful shutdown through to the dispatcher.

use crate::server::dispatch::coordinator::Dispatcher;
use award_relay_core::{BatchResponse, Error, ItemId, Result, Subject};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use core::time::Duration;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Cloneable handle shared by every request handler.
#[derive(Clone)]
pub struct AwardService {
    dispatcher: Arc<Dispatcher>,
}

impl AwardService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Builds the axum router for this service.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/badges/{subject}", post(resolve_badges))
            .route("/health", get(health))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(self.clone())
    }

    pub fn is_serving(&self) -> bool {
        self.dispatcher.is_accepting()
    }

    /// Stops accepting batches, drains the ones in flight for up to
    /// `drain_timeout`, then stops the workers.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.dispatcher.shutdown(drain_timeout).await;
    }
}

#[tracing::instrument(skip_all, fields(subject = %subject, count = tracing::field::Empty))]
async fn resolve_badges(
    State(service): State<AwardService>,
    Path(subject): Path<String>,
    body: String,
) -> Result<Json<BatchResponse>> {
    let subject = parse_subject(&subject)?;
    let identifiers = parse_identifiers(&body)?;
    tracing::Span::current().record("count", identifiers.len());

    tracing::debug!(
        "Received {} identifiers for subject {subject}",
        identifiers.len()
    );

    let aggregate = service.dispatcher.process(subject, identifiers).await?;
    Ok(Json(BatchResponse::from(aggregate)))
}

async fn health(State(service): State<AwardService>) -> StatusCode {
    if service.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Parses a path segment as a subject id.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] unless `raw` is a non-negative integer.
pub fn parse_subject(raw: &str) -> Result<Subject> {
    raw.trim()
        .parse()
        .map_err(|_| Error::invalid(format!("subject `{raw}` is not a numeric id")))
}

/// Parses a comma-separated identifier list.
///
/// Whitespace around tokens and empty tokens (e.g. a trailing comma) are
/// ignored. Order and duplicates are preserved; the dispatcher collapses
/// repeats.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] if any token is not an integer or if no
/// identifiers remain.
pub fn parse_identifiers(body: &str) -> Result<Vec<ItemId>> {
    let identifiers = body
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<ItemId>()
                .map_err(|_| Error::invalid(format!("identifier `{token}` is not numeric")))
        })
        .collect::<Result<Vec<_>>>()?;

    if identifiers.is_empty() {
        return Err(Error::invalid("at least one identifier is required"));
    }
    Ok(identifiers)
}
