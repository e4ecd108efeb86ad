//! Asynchronous worker pool for chunked award lookups.
//!
//! This module defines the [`WorkerPool`] struct, which owns a fixed set of
//! worker tasks that process [`WorkRequest`]s. Work is assigned round-robin
//! and the pool supports coordinated shutdown via a shared
//! [`CancellationToken`].
//!
//! Each worker listens on its own [`mpsc::UnboundedReceiver`], so a batch can
//! enqueue every chunk without awaiting capacity.

use crate::server::{
    pool::{
        request::{WorkRequest, WorkerReply},
        worker::{RetryPolicy, worker_loop},
    },
    source::AwardSource,
};
use award_relay_core::{Envelope, Error};
use core::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// How long each worker gets to acknowledge a shutdown request.
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// The inbox of one worker, addressed by its pool index.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    index: usize,
    tx: mpsc::UnboundedSender<WorkRequest>,
}

impl WorkerHandle {
    pub const fn new(index: usize, tx: mpsc::UnboundedSender<WorkRequest>) -> Self {
        Self { index, tx }
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    /// Enqueues `envelope` for this worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`] if the worker has exited.
    pub fn send(&self, envelope: Envelope) -> Result<(), Error> {
        self.tx
            .send(WorkRequest::Envelope(envelope))
            .map_err(|_| Error::ChannelError {
                context: format!("Worker {} channel closed", self.index),
            })
    }
}

/// A cooperative pool of asynchronous workers that process [`WorkRequest`]s.
///
/// Slots are handed out by a monotonically increasing cursor, so successive
/// reservations walk the workers in order and wrap around.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    /// Constructs a new [`WorkerPool`] from initialized worker handles and a
    /// shared cancellation token.
    ///
    /// `workers` must not be empty.
    pub fn new(
        workers: Vec<WorkerHandle>,
        tasks: Vec<JoinHandle<()>>,
        shutdown_token: CancellationToken,
    ) -> Self {
        debug_assert!(!workers.is_empty(), "worker pool needs at least one worker");
        Self {
            workers,
            tasks: parking_lot::Mutex::new(tasks),
            next_worker: AtomicUsize::new(0),
            shutdown_token,
        }
    }

    /// Spawns `size` workers that query `source`, all reporting on `outbound`.
    pub fn spawn<S: AwardSource>(
        size: usize,
        source: &S,
        policy: RetryPolicy,
        outbound: &mpsc::UnboundedSender<WorkerReply>,
    ) -> Self {
        let mut workers = Vec::with_capacity(size);
        let mut tasks = Vec::with_capacity(size);

        for index in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            tasks.push(tokio::spawn(worker_loop(
                index,
                rx,
                outbound.clone(),
                source.clone(),
                policy,
            )));
            workers.push(WorkerHandle::new(index, tx));
        }

        tracing::info!("Spawned {size} workers");
        Self::new(workers, tasks, CancellationToken::new())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Claims `count` consecutive slots and returns the first one.
    ///
    /// Slot `start + j` belongs to worker `(start + j) % len()`. Reserving the
    /// whole range at once keeps the chunks of one batch on consecutive workers
    /// even when other batches are dispatching concurrently.
    pub fn reserve(&self, count: usize) -> usize {
        self.next_worker.fetch_add(count, Ordering::Relaxed)
    }

    /// The worker owning reservation slot `slot`.
    pub fn worker(&self, slot: usize) -> &WorkerHandle {
        &self.workers[slot % self.workers.len()]
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Shuts down all workers in the pool.
    ///
    /// - Cancels the shared [`CancellationToken`] to prevent new work.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker.
    /// - Waits (up to 3 seconds per worker) for shutdown acknowledgements,
    ///   then joins the worker tasks.
    pub async fn shutdown(&self) {
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.workers.len());

        for worker in &self.workers {
            let (tx, rx) = oneshot::channel();
            if let Err(e) = worker.tx.send(WorkRequest::Shutdown { response: tx }) {
                tracing::error!("Failed to send shutdown to worker {}: {e}", worker.index);
            } else {
                shutdown_handles.push((worker.index, rx));
            }
        }

        tracing::debug!("Waiting for up to 3s per worker for shutdown acknowledgements");

        let timeout_futures = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(SHUTDOWN_ACK_TIMEOUT, rx).await {
                Ok(Ok(())) => tracing::trace!("Worker {i} shutdown acknowledged"),
                Ok(Err(e)) => tracing::error!("Worker {i} returned error: {e}"),
                Err(_) => tracing::warn!("Worker {i} shutdown timed out"),
            }
        });
        futures::future::join_all(timeout_futures).await;

        let tasks = core::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        futures::future::join_all(tasks).await;

        tracing::info!("Worker pool shutdown complete");
    }
}
