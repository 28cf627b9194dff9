//! Error types for the Parley service.

use thiserror::Error;

/// Result type alias using the Parley error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Parley.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Upstream provider error
    #[error("Upstream error: {0}")]
    External(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this is an authentication error.
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Auth(_) => 401,
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::External(_) => 502,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::Auth("test".into()).status_code(), 401);
        assert_eq!(Error::NotFound("test".into()).status_code(), 404);
        assert_eq!(Error::InvalidInput("test".into()).status_code(), 400);
        assert_eq!(Error::External("test".into()).status_code(), 502);
        assert_eq!(Error::Internal("test".into()).status_code(), 500);
        assert_eq!(Error::Config("test".into()).status_code(), 500);
    }

    #[test]
    fn test_is_auth() {
        assert!(Error::Auth("test".into()).is_auth());
        assert!(!Error::Internal("test".into()).is_auth());
    }

    #[test]
    fn test_error_display() {
        let err = Error::External("provider timed out".into());
        assert_eq!(err.to_string(), "Upstream error: provider timed out");
    }
}
