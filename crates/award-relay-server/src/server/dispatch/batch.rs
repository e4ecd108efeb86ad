use award_relay_core::{AggregatedResult, ItemId, ItemResult, MAX_CHUNK_SIZE, Subject};
use tokio::time::Instant;

/// Splits `identifiers` into consecutive chunks of at most [`MAX_CHUNK_SIZE`].
///
/// Concatenating the chunks gives back the input exactly.
pub fn chunk_identifiers(identifiers: &[ItemId]) -> impl ExactSizeIterator<Item = &[ItemId]> {
    identifiers.chunks(MAX_CHUNK_SIZE)
}

/// How one chunk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed(Vec<ItemResult>),
    Failed { error: String },
}

/// A chunk outcome addressed to its position within the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    pub chunk: usize,
    pub outcome: ChunkOutcome,
}

/// Completion state of one caller request.
///
/// Outcomes are slotted by chunk index, so the aggregate keeps request order
/// no matter the order replies land in.
#[derive(Debug)]
pub struct Batch {
    subject: Subject,
    total_items: usize,
    chunks: Vec<Option<ChunkOutcome>>,
    completed: usize,
    failed: usize,
    started: Instant,
}

impl Batch {
    pub fn new(subject: Subject, total_items: usize, chunk_count: usize) -> Self {
        Self {
            subject,
            total_items,
            chunks: vec![None; chunk_count],
            completed: 0,
            failed: 0,
            started: Instant::now(),
        }
    }

    pub const fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub const fn completed(&self) -> usize {
        self.completed
    }

    pub const fn failed(&self) -> usize {
        self.failed
    }

    /// Every chunk has either completed or failed.
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed == self.chunks.len()
    }

    /// Records the outcome of chunk `report.chunk`.
    ///
    /// Returns `false` (and changes nothing) if the index is out of range or
    /// the chunk was already settled.
    pub fn record(&mut self, report: ChunkReport) -> bool {
        let Some(slot) = self.chunks.get_mut(report.chunk) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }

        match report.outcome {
            ChunkOutcome::Completed(_) => self.completed += 1,
            ChunkOutcome::Failed { .. } => self.failed += 1,
        }
        *slot = Some(report.outcome);
        true
    }

    /// Marks every chunk still outstanding as failed with `error`.
    pub fn fail_remaining(&mut self, error: &str) {
        for slot in &mut self.chunks {
            if slot.is_none() {
                *slot = Some(ChunkOutcome::Failed {
                    error: error.to_string(),
                });
                self.failed += 1;
            }
        }
    }

    /// Consumes the batch into the caller-facing aggregate.
    pub fn finish(self) -> AggregatedResult {
        let elapsed = self.started.elapsed();
        let results = self
            .chunks
            .into_iter()
            .flat_map(|slot| match slot {
                Some(ChunkOutcome::Completed(results)) => results,
                Some(ChunkOutcome::Failed { .. }) | None => Vec::new(),
            })
            .collect();

        AggregatedResult {
            subject: self.subject,
            results,
            elapsed,
            failed_chunks: self.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_partitions_the_input() {
        for len in [1_usize, 99, 100, 101, 250, 1000] {
            let identifiers: Vec<ItemId> = (0..len as u64).collect();
            let chunks: Vec<&[ItemId]> = chunk_identifiers(&identifiers).collect();

            assert_eq!(chunks.len(), len.div_ceil(MAX_CHUNK_SIZE));
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= MAX_CHUNK_SIZE));
            assert_eq!(chunks.concat(), identifiers);
        }
    }

    #[test]
    fn chunk_sizes_for_250() {
        let identifiers: Vec<ItemId> = (0..250).collect();
        let sizes: Vec<usize> = chunk_identifiers(&identifiers).map(<[_]>::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn aggregate_keeps_chunk_order_regardless_of_arrival() {
        let mut batch = Batch::new(9, 4, 2);

        assert!(batch.record(ChunkReport {
            chunk: 1,
            outcome: ChunkOutcome::Completed(vec![ItemResult::not_owned(3), ItemResult::not_owned(4)]),
        }));
        assert!(!batch.is_settled());
        assert!(batch.record(ChunkReport {
            chunk: 0,
            outcome: ChunkOutcome::Completed(vec![ItemResult::not_owned(1), ItemResult::not_owned(2)]),
        }));
        assert!(batch.is_settled());

        let aggregate = batch.finish();
        let ids: Vec<ItemId> = aggregate.results.iter().map(|r| r.identifier).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(aggregate.subject, 9);
        assert!(aggregate.is_complete());
    }

    #[tokio::test]
    async fn duplicate_and_out_of_range_reports_are_ignored() {
        let mut batch = Batch::new(1, 1, 1);
        let report = ChunkReport {
            chunk: 0,
            outcome: ChunkOutcome::Completed(vec![ItemResult::not_owned(1)]),
        };

        assert!(batch.record(report.clone()));
        assert!(!batch.record(report));
        assert!(!batch.record(ChunkReport {
            chunk: 5,
            outcome: ChunkOutcome::Failed {
                error: "late".into()
            },
        }));
        assert_eq!((batch.completed(), batch.failed()), (1, 0));
    }

    #[tokio::test]
    async fn failed_chunks_are_excluded_and_counted() {
        let mut batch = Batch::new(1, 150, 2);
        batch.record(ChunkReport {
            chunk: 0,
            outcome: ChunkOutcome::Failed {
                error: "retries exceeded".into(),
            },
        });
        batch.record(ChunkReport {
            chunk: 1,
            outcome: ChunkOutcome::Completed(vec![ItemResult::owned(7, None)]),
        });

        let aggregate = batch.finish();
        assert_eq!(aggregate.results, vec![ItemResult::owned(7, None)]);
        assert_eq!(aggregate.failed_chunks, 1);
        assert!(!aggregate.is_complete());
    }

    #[tokio::test]
    async fn fail_remaining_settles_the_batch() {
        let mut batch = Batch::new(1, 300, 3);
        batch.record(ChunkReport {
            chunk: 1,
            outcome: ChunkOutcome::Completed(Vec::new()),
        });

        batch.fail_remaining("router closed");

        assert!(batch.is_settled());
        assert_eq!(batch.failed(), 2);
    }
}
