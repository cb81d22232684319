//! Decision client error types

use thiserror::Error;

/// Result type for decision service calls
pub type DecisionResult<T> = Result<T, DecisionError>;

/// Failures talking to the decision service.
///
/// A response body that fails to decode is not an error; see
/// [`crate::decode_permissive`].
#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("Decision service unreachable: {0}")]
    Transport(String),

    #[error("Invalid decision service URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl From<DecisionError> for strandgate_core::Error {
    fn from(err: DecisionError) -> Self {
        strandgate_core::Error::Decision(err.to_string())
    }
}
