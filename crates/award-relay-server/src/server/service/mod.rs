//! HTTP service layer.
//!
//! ## Structure
//!
//! - [`handler`] - axum routes and request parsing (`AwardService`).

pub mod handler;
