//! LDAP front-end for Strandgate
//!
//! Accepts LDAP bind and search requests on a plaintext and a TLS listener,
//! keeps per-connection session state, and forwards every decision to the
//! external decision service.
//!
//! - [`session`] - connection identity, sessions, and the per-listener registry
//! - [`handler`] - translation between LDAP operations and decision requests
//! - [`connection`] - per-connection LDAP message loop
//! - [`stream`] - plain or TLS client transport
//! - [`listener`] - TCP/TLS accept loop for one endpoint
//! - [`server`] - bootstrap of both endpoints
//! - [`tls`] - certificate loading and development certificate generation
//! - [`metrics`] - Prometheus metrics

pub mod connection;
pub mod handler;
pub mod listener;
pub mod metrics;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;

pub use handler::LdapHandler;
pub use listener::LdapListener;
pub use server::{BoundServer, LdapServer};
pub use session::{ConnectionId, ListenerKind, Session, SessionRegistry};
pub use tls::TlsAcceptor;
