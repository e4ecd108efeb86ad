//! Shared protocol, result types and errors used across the `award-relay`
//! server.
//!
//! ## Submodules
//!
//! - [`envelope`] - The closed message enum exchanged between the dispatcher
//!   and its workers.
//! - [`error`] - Centralized service error type and its HTTP mapping.
//! - [`types`] - Identifiers, correlation ids, per-item results and the
//!   aggregated batch response.

pub mod envelope;
pub mod error;
pub mod types;

pub use envelope::Envelope;
pub use error::{Error, Result};
pub use types::*;
