//! Batch dispatch and aggregation.
//!
//! ## Structure
//!
//! - [`batch`] - Chunking and per-batch completion state.
//! - [`router`] - The outstanding-request table and the task that routes
//!   worker replies back to their batches.
//! - [`coordinator`] - [`coordinator::Dispatcher`], the caller-facing entry
//!   point.

pub mod batch;
pub mod coordinator;
pub mod router;
