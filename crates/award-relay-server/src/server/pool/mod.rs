//! Worker runtimes and the pool that owns them.
//!
//! ## Structure
//!
//! - [`request`] - Messages into and out of a worker.
//! - [`worker`] - Per-worker loop and the retry state machine for one request.
//! - [`manager`] - [`manager::WorkerPool`]: round-robin assignment and
//!   coordinated shutdown.

pub mod manager;
pub mod request;
pub mod worker;
