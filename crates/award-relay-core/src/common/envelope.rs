use super::types::{CorrelationId, ItemId, ItemResult, Subject};
use serde::{Deserialize, Serialize};

/// A message exchanged between the dispatcher and a worker runtime.
///
/// This enum is the whole contract between the two ends of a worker channel.
/// The variant set is closed: adding one means updating both the worker
/// runtime and the dispatcher's router in the same change.
///
/// Every variant except [`Envelope::Log`] carries the `correlation_id` of the
/// request it belongs to and the `retry_count` the worker reached. Each
/// [`Envelope::ItemsRequest`] is answered by exactly one terminal envelope
/// ([`Envelope::ItemsResponse`] or [`Envelope::RequestFailed`]) with the same
/// `correlation_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Resolve award state for up to `MAX_CHUNK_SIZE` identifiers.
    ///
    /// - `retry_count`: Starts at 0. Only the worker that owns the retry
    ///   decision increments it.
    /// - `identifiers`: Order is preserved from the caller's batch.
    ItemsRequest {
        correlation_id: CorrelationId,
        retry_count: u32,
        subject: Subject,
        identifiers: Vec<ItemId>,
    },

    /// Terminal success. `results` holds one entry per distinct requested
    /// identifier.
    ItemsResponse {
        correlation_id: CorrelationId,
        retry_count: u32,
        subject: Subject,
        results: Vec<ItemResult>,
    },

    /// Terminal failure for a single request.
    RequestFailed {
        correlation_id: CorrelationId,
        retry_count: u32,
        error: String,
    },

    /// Best-effort diagnostic line from a worker. Never correlated, safe to
    /// drop.
    Log { message: String },
}

impl Envelope {
    /// Builds the first attempt of a request: `retry_count` starts at 0.
    #[must_use]
    pub const fn items_request(
        correlation_id: CorrelationId,
        subject: Subject,
        identifiers: Vec<ItemId>,
    ) -> Self {
        Self::ItemsRequest {
            correlation_id,
            retry_count: 0,
            subject,
            identifiers,
        }
    }

    #[must_use]
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    /// The correlation id, or `None` for [`Envelope::Log`].
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::ItemsRequest { correlation_id, .. }
            | Self::ItemsResponse { correlation_id, .. }
            | Self::RequestFailed { correlation_id, .. } => Some(*correlation_id),
            Self::Log { .. } => None,
        }
    }

    /// Whether this envelope settles an outstanding request.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ItemsResponse { .. } | Self::RequestFailed { .. }
        )
    }
}
