use award_relay_core::Envelope;
use tokio::sync::oneshot;

/// A message sent from the worker pool to an individual worker task.
///
/// Protocol traffic travels inside [`WorkRequest::Envelope`]; pool control
/// (shutdown) never appears in the [`Envelope`] contract.
#[derive(Debug)]
pub enum WorkRequest {
    /// A protocol envelope for the worker runtime. Only
    /// [`Envelope::ItemsRequest`] is acted on.
    Envelope(Envelope),

    /// Request the worker to shut down.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   stopped its in-flight requests and exited its loop.
    Shutdown { response: oneshot::Sender<()> },
}

/// An envelope emitted by a worker, tagged with the worker's pool index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReply {
    pub worker_id: usize,
    pub envelope: Envelope,
}
