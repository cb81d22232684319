//! Decision service client for Strandgate
//!
//! Every bind and search decision is made by an external HTTP authority.
//! This crate owns the wire contract with that service:
//! - form-encoded `POST /bind` and `POST /search` requests
//! - JSON response envelopes, decoded permissively (a body that does not
//!   decode is treated as a negative decision)

mod client;
mod error;
mod types;

pub use client::{DecisionService, HttpDecisionClient};
pub use error::{DecisionError, DecisionResult};
pub use types::*;
