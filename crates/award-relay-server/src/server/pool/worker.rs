use crate::server::{
    pool::request::{WorkRequest, WorkerReply},
    source::AwardSource,
};
use award_relay_core::{CorrelationId, Envelope, ItemId, MAX_RETRIES, RETRY_BACKOFF, Subject};
use core::time::Duration;
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{Instant, sleep},
};
use tracing::Instrument;

/// How a worker treats transient source failures.
///
/// A request is attempted once, then retried up to `max_retries` times with a
/// fixed `backoff` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff: RETRY_BACKOFF,
        }
    }
}

/// Main execution loop for a worker task.
///
/// Listens for [`WorkRequest`] messages on `rx`. Each
/// [`Envelope::ItemsRequest`] is handed to its own task running
/// [`run_items_request`], so a request sitting in backoff never delays the
/// next one. Terminal and log envelopes go out on `outbound`, tagged with
/// `worker_id`.
///
/// On [`WorkRequest::Shutdown`] the worker aborts any requests still in
/// flight, acknowledges, and exits.
///
/// # Arguments
///
/// - `worker_id`: Pool index of this worker, used for logs and reply tagging.
/// - `rx`: Receiver for incoming [`WorkRequest`] messages.
/// - `outbound`: Shared channel back to the dispatcher's router.
/// - `source`: The external source this worker queries.
/// - `policy`: Retry bound and backoff for transient failures.
pub async fn worker_loop<S: AwardSource>(
    worker_id: usize,
    mut rx: mpsc::UnboundedReceiver<WorkRequest>,
    outbound: mpsc::UnboundedSender<WorkerReply>,
    source: S,
    policy: RetryPolicy,
) {
    tracing::debug!("Worker {worker_id} started");
    emit(
        &outbound,
        worker_id,
        Envelope::log(format!("Worker {worker_id} created")),
    );

    let mut in_flight = JoinSet::new();

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Envelope(Envelope::ItemsRequest {
                correlation_id,
                retry_count,
                subject,
                identifiers,
            }) => {
                let source = source.clone();
                let outbound = outbound.clone();
                let span = tracing::info_span!(
                    "items_request",
                    worker = worker_id,
                    correlation_id = %correlation_id
                );
                let fut = async move {
                    let terminal = run_items_request(
                        worker_id,
                        ItemsRequest {
                            correlation_id,
                            retry_count,
                            subject,
                            identifiers,
                        },
                        &source,
                        policy,
                        &outbound,
                    )
                    .await;
                    emit(&outbound, worker_id, terminal);
                };
                in_flight.spawn(fut.instrument(span));
            }
            WorkRequest::Envelope(other) => {
                tracing::warn!(
                    "Worker {worker_id} ignoring non-request envelope {:?}",
                    other.correlation_id()
                );
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");
                in_flight.abort_all();

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }

        // Reap whatever finished since the last message.
        while in_flight.try_join_next().is_some() {}
    }

    tracing::debug!("Worker {worker_id} stopped");
}

/// The fields of an [`Envelope::ItemsRequest`], owned by the task driving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsRequest {
    pub correlation_id: CorrelationId,
    pub retry_count: u32,
    pub subject: Subject,
    pub identifiers: Vec<ItemId>,
}

/// Drives one request to its terminal envelope.
///
/// `Received -> (Retrying)* -> Responded | Failed`:
///
/// - The retry guard runs before every attempt: once `retry_count` exceeds
///   `policy.max_retries` the request fails without calling the source.
/// - A successful call yields [`Envelope::ItemsResponse`] carrying the
///   correlation id of the request.
/// - A failed call bumps `retry_count`, waits `policy.backoff`, and loops.
///
/// Per-attempt timing and failures are reported as [`Envelope::Log`] on
/// `outbound`. The returned envelope is always terminal.
pub async fn run_items_request<S: AwardSource>(
    worker_id: usize,
    request: ItemsRequest,
    source: &S,
    policy: RetryPolicy,
    outbound: &mpsc::UnboundedSender<WorkerReply>,
) -> Envelope {
    let ItemsRequest {
        correlation_id,
        mut retry_count,
        subject,
        identifiers,
    } = request;
    let mut last_error: Option<String> = None;

    loop {
        if retry_count > policy.max_retries {
            let error = match last_error {
                Some(cause) => format!("retries exceeded: {cause}"),
                None => "retries exceeded".to_string(),
            };
            return Envelope::RequestFailed {
                correlation_id,
                retry_count,
                error,
            };
        }

        let started = Instant::now();
        match source.fetch_award_status(subject, &identifiers).await {
            Ok(results) => {
                emit(
                    outbound,
                    worker_id,
                    Envelope::log(format!(
                        "Resolved {} items for subject {subject} in {:?} (request {correlation_id}, attempt {})",
                        results.len(),
                        started.elapsed(),
                        retry_count + 1
                    )),
                );
                return Envelope::ItemsResponse {
                    correlation_id,
                    retry_count,
                    subject,
                    results,
                };
            }
            Err(e) => {
                emit(
                    outbound,
                    worker_id,
                    Envelope::log(format!(
                        "Attempt {} for request {correlation_id} failed after {:?}: {e}",
                        retry_count + 1,
                        started.elapsed()
                    )),
                );
                last_error = Some(e.to_string());
                retry_count += 1;
                sleep(policy.backoff).await;
            }
        }
    }
}

fn emit(outbound: &mpsc::UnboundedSender<WorkerReply>, worker_id: usize, envelope: Envelope) {
    // The router only goes away during shutdown, at which point nobody is
    // waiting for this reply.
    if outbound
        .send(WorkerReply {
            worker_id,
            envelope,
        })
        .is_err()
    {
        tracing::trace!("Worker {worker_id} dropped a reply: router closed");
    }
}
