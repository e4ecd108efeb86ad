//! External award data sources.
//!
//! A source answers one question for one chunk: which of these identifiers has
//! the subject been awarded, and when. Sources never chunk and never retry;
//! both are the worker runtime's job.
//!
//! ## Structure
//!
//! - [`AwardSource`] - The seam the worker runtime calls through.
//! - [`reconcile`] - Turns a partial "awarded only" answer into one
//!   [`ItemResult`] per requested identifier.
//! - [`roblox`] - The HTTP implementation backed by the Roblox badges API.

pub mod roblox;

use award_relay_core::{ItemId, ItemResult, MAX_CHUNK_SIZE, Subject};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Transient failure of a single external call. Every variant is retryable.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Connection, TLS, proxy or timeout failure.
    #[error("request to award source failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The source answered with a non-2xx status.
    #[error("award source returned HTTP {status}")]
    Status { status: u16 },

    /// The body could not be parsed as the expected JSON shape.
    #[error("award source returned an unreadable body: {0}")]
    Decode(#[source] reqwest::Error),

    /// The caller handed over more identifiers than one call may carry.
    #[error("{count} identifiers exceed the per-call limit of {MAX_CHUNK_SIZE}")]
    TooManyIdentifiers { count: usize },
}

/// A single external data source queried by worker runtimes.
///
/// Implementations must be stateless per call and safe to invoke concurrently
/// from every worker in the pool.
pub trait AwardSource: Clone + Send + Sync + 'static {
    /// Resolves award state for `identifiers` (1 to [`MAX_CHUNK_SIZE`] of them)
    /// with exactly one external call.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] on network failure, non-2xx status, or an
    /// unparsable body. The caller decides whether to retry.
    fn fetch_award_status(
        &self,
        subject: Subject,
        identifiers: &[ItemId],
    ) -> impl Future<Output = Result<Vec<ItemResult>, SourceError>> + Send;
}

/// One awarded identifier as reported by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Award {
    pub identifier: ItemId,
    pub awarded_at: Option<DateTime<Utc>>,
}

/// Derives a complete result set from a source answer that lists only the
/// identifiers that were awarded.
///
/// - Each distinct requested identifier appears exactly once, in request
///   order.
/// - Present in `awarded` → `owned = true` with its timestamp.
/// - Absent → `owned = false`, no timestamp.
/// - Awards for identifiers that were not requested are ignored.
///
/// Pure: the same inputs always give the same output.
#[must_use]
pub fn reconcile(requested: &[ItemId], awarded: &[Award]) -> Vec<ItemResult> {
    let awarded: HashMap<ItemId, Option<DateTime<Utc>>> = awarded
        .iter()
        .map(|award| (award.identifier, award.awarded_at))
        .collect();

    let mut seen = HashSet::with_capacity(requested.len());
    requested
        .iter()
        .filter(|id| seen.insert(**id))
        .map(|&id| match awarded.get(&id) {
            Some(&awarded_at) => ItemResult::owned(id, awarded_at),
            None => ItemResult::not_owned(id),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> Option<DateTime<Utc>> {
        Some(raw.parse().unwrap())
    }

    #[test]
    fn marks_present_identifiers_owned_and_absent_ones_not() {
        let awarded = [Award {
            identifier: 2,
            awarded_at: at("2023-06-01T10:00:00Z"),
        }];

        let results = reconcile(&[1, 2, 3], &awarded);

        assert_eq!(
            results,
            vec![
                ItemResult::not_owned(1),
                ItemResult::owned(2, at("2023-06-01T10:00:00Z")),
                ItemResult::not_owned(3),
            ]
        );
    }

    #[test]
    fn every_requested_identifier_appears_exactly_once() {
        let requested: Vec<ItemId> = (1..=100).collect();
        let awarded: Vec<Award> = requested
            .iter()
            .filter(|id| *id % 3 == 0)
            .map(|&identifier| Award {
                identifier,
                awarded_at: at("2020-01-01T00:00:00Z"),
            })
            .collect();

        let results = reconcile(&requested, &awarded);

        assert_eq!(results.len(), requested.len());
        for (result, id) in results.iter().zip(&requested) {
            assert_eq!(result.identifier, *id);
            assert_eq!(result.owned, id % 3 == 0);
            assert_eq!(result.awarded_at.is_some(), result.owned);
        }
    }

    #[test]
    fn is_idempotent() {
        let awarded = [
            Award {
                identifier: 5,
                awarded_at: at("2021-02-03T04:05:06Z"),
            },
            Award {
                identifier: 8,
                awarded_at: None,
            },
        ];
        let requested = [8, 5, 13];

        assert_eq!(
            reconcile(&requested, &awarded),
            reconcile(&requested, &awarded)
        );
    }

    #[test]
    fn ignores_unrequested_awards_and_collapses_duplicates() {
        let awarded = [
            Award {
                identifier: 1,
                awarded_at: None,
            },
            Award {
                identifier: 99,
                awarded_at: None,
            },
        ];

        let results = reconcile(&[1, 1, 2], &awarded);

        assert_eq!(
            results,
            vec![ItemResult::owned(1, None), ItemResult::not_owned(2)]
        );
    }

    #[test]
    fn empty_answer_means_nothing_owned() {
        let results = reconcile(&[4, 5], &[]);
        assert!(results.iter().all(|r| !r.owned && r.awarded_at.is_none()));
    }
}
