//! # Shared Identifiers, Results and Limits
//!
//! This module defines the types that cross the boundary between the
//! dispatcher, its workers and the HTTP layer. Both ends of the worker channel
//! compile against these definitions, so the contract cannot drift.
//!
//! ## Type Aliases
//!
//! - [`Subject`] - The user whose awards are being queried.
//! - [`ItemId`] - An opaque badge identifier.
//!
//! ## Constants
//!
//! - [`MAX_CHUNK_SIZE`] - Upper bound on identifiers per external call.
//! - [`MAX_RETRIES`] - Retries granted to a chunk after its first attempt.
//! - [`RETRY_BACKOFF`] - Fixed delay between attempts.

use chrono::{DateTime, Utc};
use core::{fmt, time::Duration};
use ferroid::{base32::Base32UlidExt, id::ULID};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// The user id every identifier in a batch is checked against.
pub type Subject = u64;

/// An opaque badge identifier.
pub type ItemId = u64;

/// Maximum number of identifiers the external source accepts per call.
pub const MAX_CHUNK_SIZE: usize = 100;

/// Number of retries after the initial attempt before a chunk is failed.
pub const MAX_RETRIES: u32 = 3;

/// Fixed delay between two attempts for the same chunk. No jitter, no growth.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Process-unique token linking an `ItemsRequest` to its terminal response.
///
/// Backed by a 128-bit ULID: 48 bits of millisecond timestamp followed by 80
/// random bits, so ids sort by creation time and collisions are negligible.
/// Rendered in Crockford base32.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u128);

impl CorrelationId {
    /// Generates a fresh id from the current wall clock.
    #[must_use]
    pub fn generate() -> Self {
        Self(ULID::now().to_raw())
    }

    /// Milliseconds since the Unix epoch at which this id was generated.
    #[must_use]
    pub fn timestamp_millis(self) -> u64 {
        ULID::from_raw(self.0).timestamp() as u64
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&ULID::from_raw(self.0), f)
    }
}

impl core::str::FromStr for CorrelationId {
    type Err = InvalidCorrelationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ULID::decode(s)
            .map(|id| Self(id.to_raw()))
            .map_err(|_| InvalidCorrelationId)
    }
}

/// Returned when a string is not a 26 character Crockford base32 ULID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid correlation id")]
pub struct InvalidCorrelationId;

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CorrelationId")
            .field(&format_args!("{self}"))
            .finish()
    }
}

/// The resolved award state of a single identifier for a subject.
///
/// `owned == false` always comes with `awarded_at == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub identifier: ItemId,
    pub owned: bool,
    pub awarded_at: Option<DateTime<Utc>>,
    /// Reserved for a caching layer. Always `false`.
    pub from_cache: bool,
}

impl ItemResult {
    /// An identifier the source reported as awarded.
    #[must_use]
    pub const fn owned(identifier: ItemId, awarded_at: Option<DateTime<Utc>>) -> Self {
        Self {
            identifier,
            owned: true,
            awarded_at,
            from_cache: false,
        }
    }

    /// An identifier the source did not report.
    #[must_use]
    pub const fn not_owned(identifier: ItemId) -> Self {
        Self {
            identifier,
            owned: false,
            awarded_at: None,
            from_cache: false,
        }
    }
}

/// Everything a finished batch hands back to its caller.
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    pub subject: Subject,
    /// Every successful chunk's results, concatenated in request order.
    pub results: Vec<ItemResult>,
    pub elapsed: Duration,
    /// Chunks that exhausted their retries or could not be dispatched. Their
    /// identifiers are absent from `results`.
    pub failed_chunks: usize,
}

impl AggregatedResult {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed_chunks == 0
    }
}

/// JSON body returned to HTTP callers for a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub elapsed_time_ms: f64,
    pub item_count: usize,
    pub subject: Subject,
    pub items: Vec<ItemResult>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failed_chunks: usize,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl From<AggregatedResult> for BatchResponse {
    fn from(result: AggregatedResult) -> Self {
        Self {
            elapsed_time_ms: result.elapsed.as_secs_f64() * 1000.0,
            item_count: result.results.len(),
            subject: result.subject,
            items: result.results,
            failed_chunks: result.failed_chunks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn correlation_ids_are_unique() {
        let ids: HashSet<_> = (0..10_000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn correlation_ids_carry_generation_time() {
        let before = chrono::Utc::now().timestamp_millis() as u64;
        let id = CorrelationId::generate();
        let after = chrono::Utc::now().timestamp_millis() as u64;
        assert!(id.timestamp_millis() >= before && id.timestamp_millis() <= after);
    }

    #[test]
    fn correlation_id_renders_as_base32_ulid() {
        let id = CorrelationId::generate();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 26);
        assert_eq!(rendered.parse::<CorrelationId>(), Ok(id));
        assert!("not-a-ulid".parse::<CorrelationId>().is_err());
    }

    #[test]
    fn not_owned_results_have_no_timestamp() {
        let item = ItemResult::not_owned(7);
        assert!(!item.owned);
        assert!(item.awarded_at.is_none());
        assert!(!item.from_cache);
    }

    #[test]
    fn batch_response_uses_camel_case_keys() {
        let awarded = "2024-03-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let body = BatchResponse::from(AggregatedResult {
            subject: 123,
            results: vec![ItemResult::owned(2, Some(awarded)), ItemResult::not_owned(1)],
            elapsed: Duration::from_millis(1500),
            failed_chunks: 0,
        });

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["itemCount"], 2);
        assert_eq!(json["subject"], 123);
        assert_eq!(json["elapsedTimeMs"], 1500.0);
        assert_eq!(json["items"][0]["awardedAt"], "2024-03-01T12:00:00Z");
        assert_eq!(json["items"][0]["fromCache"], false);
        assert!(json["items"][1]["awardedAt"].is_null());
        assert!(json.get("failedChunks").is_none());
    }

    #[test]
    fn batch_response_reports_failed_chunks() {
        let body = BatchResponse::from(AggregatedResult {
            subject: 1,
            results: Vec::new(),
            elapsed: Duration::ZERO,
            failed_chunks: 2,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["failedChunks"], 2);
    }
}
