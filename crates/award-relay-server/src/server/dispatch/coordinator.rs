//! Batch coordination: fan a caller's identifiers out across the pool and
//! gather the chunk outcomes back into one aggregate.

use crate::server::{
    dispatch::{
        batch::{Batch, ChunkOutcome, ChunkReport, chunk_identifiers},
        router::{Outstanding, PendingChunk, route_replies},
    },
    pool::{manager::WorkerPool, request::WorkerReply, worker::RetryPolicy},
    source::AwardSource,
    telemetry::{
        decrement_batches_inflight, increment_batches, increment_batches_inflight,
        increment_chunk_failures, increment_items_resolved, record_batch_duration,
        record_items_per_batch,
    },
};
use award_relay_core::{AggregatedResult, CorrelationId, Envelope, Error, ItemId, Result, Subject};
use core::time::Duration;
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep, timeout},
};

/// Owns the worker pool, the outstanding-request table and the reply router.
///
/// [`Dispatcher::process`] may be called concurrently from any number of
/// tasks; each call gets its own completion channel.
pub struct Dispatcher {
    pool: WorkerPool,
    outstanding: Arc<Outstanding>,
    batches_inflight: AtomicUsize,
    accepting: AtomicBool,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns `task_threads` workers querying `source` and a router for their
    /// replies.
    pub fn spawn<S: AwardSource>(task_threads: usize, source: S, policy: RetryPolicy) -> Self {
        let (outbound, replies) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(task_threads, &source, policy, &outbound);
        // Workers hold the only senders, so the router stops once they exit.
        drop(outbound);
        Self::new(pool, replies)
    }

    /// Wraps an existing pool whose workers report on `replies`.
    pub fn new(pool: WorkerPool, replies: mpsc::UnboundedReceiver<WorkerReply>) -> Self {
        let outstanding = Arc::new(Outstanding::new());
        let router = tokio::spawn(route_replies(replies, Arc::clone(&outstanding)));

        Self {
            pool,
            outstanding,
            batches_inflight: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            router: Mutex::new(Some(router)),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire) && !self.pool.is_shutting_down()
    }

    pub fn batches_inflight(&self) -> usize {
        self.batches_inflight.load(Ordering::Relaxed)
    }

    /// Resolves award state for every identifier.
    ///
    /// Repeated identifiers are collapsed to their first occurrence. The rest
    /// are split into chunks, each chunk goes to the next worker in the
    /// rotation, and the call returns once every chunk has either answered or
    /// failed. Failed chunks are left out of `results` and counted in
    /// `failed_chunks`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `identifiers` is empty.
    /// - [`Error::ServiceShutdown`] if shutdown has begun.
    #[tracing::instrument(skip_all, fields(subject = subject, count = identifiers.len()))]
    pub async fn process(
        &self,
        subject: Subject,
        mut identifiers: Vec<ItemId>,
    ) -> Result<AggregatedResult> {
        if identifiers.is_empty() {
            return Err(Error::invalid("at least one identifier is required"));
        }
        if !self.is_accepting() {
            return Err(Error::ServiceShutdown);
        }

        let mut seen = HashSet::with_capacity(identifiers.len());
        identifiers.retain(|id| seen.insert(*id));

        let _inflight = InflightGuard::enter(&self.batches_inflight);
        increment_batches();

        let chunks: Vec<&[ItemId]> = chunk_identifiers(&identifiers).collect();
        let mut batch = Batch::new(subject, identifiers.len(), chunks.len());
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

        tracing::debug!(
            "Dispatching {} identifiers for subject {subject} as {} chunks across {} workers",
            batch.total_items(),
            batch.chunk_count(),
            self.pool.len()
        );

        let start = self.pool.reserve(chunks.len());
        for (chunk, identifiers) in chunks.into_iter().enumerate() {
            let worker = self.pool.worker(start + chunk);
            let correlation_id = CorrelationId::generate();

            self.outstanding.register(
                correlation_id,
                PendingChunk {
                    chunk,
                    batch: batch_tx.clone(),
                },
            );

            let request = Envelope::items_request(correlation_id, subject, identifiers.to_vec());
            if let Err(e) = worker.send(request) {
                self.outstanding.remove(&correlation_id);
                tracing::error!("Could not dispatch chunk {chunk} ({correlation_id}): {e}");
                batch.record(ChunkReport {
                    chunk,
                    outcome: ChunkOutcome::Failed {
                        error: e.to_string(),
                    },
                });
            } else {
                tracing::trace!("Chunk {chunk} ({correlation_id}) sent to worker {}", worker.index());
            }
        }
        drop(batch_tx);

        while !batch.is_settled() {
            match batch_rx.recv().await {
                Some(report) => {
                    batch.record(report);
                }
                None => {
                    // Every sender is gone: the outstanding table was cleared.
                    batch.fail_remaining("dispatcher shut down before the chunk completed");
                }
            }
        }

        tracing::trace!(
            "Batch for subject {subject} settled: {} completed, {} failed",
            batch.completed(),
            batch.failed()
        );
        let aggregate = batch.finish();
        let resolved = aggregate.results.len() as u64;
        increment_chunk_failures(aggregate.failed_chunks as u64);
        increment_items_resolved(resolved);
        record_items_per_batch(resolved as f64);
        record_batch_duration(aggregate.elapsed.as_secs_f64() * 1000.0);

        if aggregate.is_complete() {
            tracing::info!(
                "Resolved {resolved} items for subject {subject} in {:?}",
                aggregate.elapsed
            );
        } else {
            tracing::warn!(
                "Resolved {resolved} items for subject {subject} in {:?}; {} chunks failed",
                aggregate.elapsed,
                aggregate.failed_chunks
            );
        }

        Ok(aggregate)
    }

    /// Gracefully shuts the dispatcher down.
    ///
    /// - Stops accepting new batches.
    /// - Waits up to `drain_timeout` for in-flight batches to finish.
    /// - Shuts the worker pool down.
    /// - Clears the outstanding table so any batch still waiting completes
    ///   with its remaining chunks failed.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        tracing::info!("Refusing new batches");
        self.accepting.store(false, Ordering::Release);

        tracing::info!(
            "Draining in-flight batches ({} active)",
            self.batches_inflight()
        );
        let drain_result = timeout(drain_timeout, async {
            while self.batches_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => tracing::debug!("All in-flight batches drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} batches still active)",
                self.batches_inflight()
            ),
        }

        self.pool.shutdown().await;
        tracing::debug!(
            "Abandoning {} outstanding requests",
            self.outstanding.len()
        );
        self.outstanding.clear();

        if let Some(router) = self.router.lock().take() {
            router.abort();
        }

        tracing::info!("Dispatcher shutdown complete");
    }
}

/// Counts a batch as in flight for as long as it is alive, including when the
/// caller drops the future early.
struct InflightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InflightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        increment_batches_inflight();
        Self { counter }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
        decrement_batches_inflight();
    }
}
