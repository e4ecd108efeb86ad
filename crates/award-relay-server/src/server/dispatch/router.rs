use crate::server::{
    dispatch::batch::{ChunkOutcome, ChunkReport},
    pool::request::WorkerReply,
};
use award_relay_core::{CorrelationId, Envelope};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;

/// Where the terminal reply for one correlation id must go.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk: usize,
    pub batch: mpsc::UnboundedSender<ChunkReport>,
}

/// Correlation ids of every request that has been sent but not yet answered.
///
/// Removal is the single point where a reply is accepted: whoever removes an
/// id owns its reply, so each request is completed at most once.
#[derive(Debug, Default)]
pub struct Outstanding {
    pending: Mutex<HashMap<CorrelationId, PendingChunk>>,
}

impl Outstanding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: CorrelationId, pending: PendingChunk) {
        self.pending.lock().insert(id, pending);
    }

    pub fn remove(&self, id: &CorrelationId) -> Option<PendingChunk> {
        self.pending.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drops every pending entry. Waiting batches see their channel close.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

/// Consumes every envelope emitted by every worker until all workers have
/// hung up.
///
/// - `ItemsResponse` completes its chunk.
/// - `RequestFailed` fails its chunk and is logged at `error`.
/// - Replies for ids that are not outstanding are logged at `warn` and
///   discarded.
/// - `Log` envelopes are re-emitted as `info` events tagged with the worker.
pub async fn route_replies(
    mut replies: mpsc::UnboundedReceiver<WorkerReply>,
    outstanding: Arc<Outstanding>,
) {
    while let Some(WorkerReply {
        worker_id,
        envelope,
    }) = replies.recv().await
    {
        match envelope {
            Envelope::ItemsResponse {
                correlation_id,
                results,
                ..
            } => forward(
                &outstanding,
                worker_id,
                correlation_id,
                ChunkOutcome::Completed(results),
            ),
            Envelope::RequestFailed {
                correlation_id,
                retry_count,
                error,
            } => {
                tracing::error!(
                    "Worker {worker_id} gave up on request {correlation_id} after {retry_count} retries: {error}"
                );
                forward(
                    &outstanding,
                    worker_id,
                    correlation_id,
                    ChunkOutcome::Failed { error },
                );
            }
            Envelope::Log { message } => {
                tracing::info!(worker = worker_id, "{message}");
            }
            Envelope::ItemsRequest { correlation_id, .. } => {
                tracing::warn!("Worker {worker_id} sent a request ({correlation_id}) upstream");
            }
        }
    }

    tracing::debug!("Reply router stopped");
}

fn forward(
    outstanding: &Outstanding,
    worker_id: usize,
    correlation_id: CorrelationId,
    outcome: ChunkOutcome,
) {
    let Some(PendingChunk { chunk, batch }) = outstanding.remove(&correlation_id) else {
        tracing::warn!("Worker {worker_id} replied to unknown request {correlation_id}");
        return;
    };

    if batch.send(ChunkReport { chunk, outcome }).is_err() {
        tracing::debug!("Batch for request {correlation_id} is no longer waiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use award_relay_core::ItemResult;

    fn reply(envelope: Envelope) -> WorkerReply {
        WorkerReply {
            worker_id: 0,
            envelope,
        }
    }

    #[tokio::test]
    async fn forwards_terminal_replies_exactly_once() {
        let outstanding = Arc::new(Outstanding::new());
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        let id = CorrelationId::generate();
        outstanding.register(
            id,
            PendingChunk {
                chunk: 2,
                batch: batch_tx,
            },
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route_replies(rx, Arc::clone(&outstanding)));

        let response = Envelope::ItemsResponse {
            correlation_id: id,
            retry_count: 0,
            subject: 1,
            results: vec![ItemResult::not_owned(5)],
        };
        tx.send(reply(response.clone())).unwrap();
        tx.send(reply(response)).unwrap();
        drop(tx);
        router.await.unwrap();

        assert_eq!(
            batch_rx.recv().await,
            Some(ChunkReport {
                chunk: 2,
                outcome: ChunkOutcome::Completed(vec![ItemResult::not_owned(5)]),
            })
        );
        // The duplicate was discarded and the entry is gone, closing the
        // batch channel.
        assert_eq!(batch_rx.recv().await, None);
        assert_eq!(outstanding.len(), 0);
    }

    #[tokio::test]
    async fn failed_requests_become_failed_chunks() {
        let outstanding = Arc::new(Outstanding::new());
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        let id = CorrelationId::generate();
        outstanding.register(
            id,
            PendingChunk {
                chunk: 0,
                batch: batch_tx,
            },
        );

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(reply(Envelope::RequestFailed {
            correlation_id: id,
            retry_count: 4,
            error: "retries exceeded".into(),
        }))
        .unwrap();
        drop(tx);
        route_replies(rx, Arc::clone(&outstanding)).await;

        assert_eq!(
            batch_rx.recv().await.map(|r| r.outcome),
            Some(ChunkOutcome::Failed {
                error: "retries exceeded".into()
            })
        );
    }

    #[tokio::test]
    async fn unknown_ids_and_logs_leave_outstanding_untouched() {
        let outstanding = Arc::new(Outstanding::new());
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        let known = CorrelationId::generate();
        outstanding.register(
            known,
            PendingChunk {
                chunk: 0,
                batch: batch_tx,
            },
        );

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(reply(Envelope::ItemsResponse {
            correlation_id: CorrelationId::generate(),
            retry_count: 0,
            subject: 1,
            results: Vec::new(),
        }))
        .unwrap();
        tx.send(reply(Envelope::log("hello"))).unwrap();
        drop(tx);
        route_replies(rx, Arc::clone(&outstanding)).await;

        assert_eq!(outstanding.len(), 1);
        assert!(batch_rx.try_recv().is_err());
    }
}
