//! Error types for Strandgate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // TLS Errors
    #[error("TLS error: {0}")]
    Tls(String),

    // Decision Service Errors
    #[error("Decision service error: {0}")]
    Decision(String),

    // Internal Errors
    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Short machine-readable code, used as a label in logs and metrics
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::Tls(_) => "TlsError",
            Error::Decision(_) => "DecisionError",
            Error::InternalError(_) => "InternalError",
            Error::Io(_) => "IoError",
            Error::Other(_) => "InternalError",
        }
    }

    /// Whether the process should stop because of this error.
    ///
    /// Only startup failures are fatal; everything that happens inside a
    /// connection is converted to an LDAP result code instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::Tls(_) | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidConfig("x".into()).code(), "InvalidConfig");
        assert_eq!(Error::Decision("down".into()).code(), "DecisionError");
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy"));
        assert_eq!(io.code(), "IoError");
    }

    #[test]
    fn test_fatal_errors() {
        let bind = Error::from(std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy"));
        assert!(bind.is_fatal());
        assert!(Error::Tls("bad key".into()).is_fatal());
        assert!(!Error::Decision("timeout".into()).is_fatal());
    }
}
