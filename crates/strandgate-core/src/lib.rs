//! Strandgate Core Library
//!
//! Configuration, error types, and shared utilities for the strandgate LDAP
//! front-end.

pub mod config;
pub mod error;
pub mod utils;

pub use config::StrandgateConfig;
pub use error::{Error, Result};

/// Strandgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default plaintext LDAP listen address
pub const DEFAULT_LDAP_ADDRESS: &str = "0.0.0.0:3389";

/// Default LDAPS listen address
pub const DEFAULT_LDAPS_ADDRESS: &str = "0.0.0.0:6636";

/// Default decision service base URL
pub const DEFAULT_DECISION_URL: &str = "http://localhost:25565";
