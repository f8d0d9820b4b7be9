//! Error types for session operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key material rejected by the AEAD engine
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Sealing a payload failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// No configured key authenticated the ciphertext
    #[error("Failed to decrypt data")]
    Decryption,

    /// Compression or decompression failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Malformed session cookie
    #[error("Invalid cookie: {0}")]
    InvalidCookie(String),

    /// Encoded cookie exceeds the size ceiling
    #[error("Cookie size {size} is greater than max {max}")]
    CookieTooLarge { size: usize, max: usize },

    /// Session expired
    #[error("Session expired at {0}")]
    Expired(DateTime<Utc>),

    /// Storage backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Response write refused because session finalization failed
    #[error("Request interrupted by session finalization")]
    Interrupted,

    /// Underlying connection or socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the error stems from an unreadable client cookie.
    ///
    /// These errors are never surfaced to the client: the manager logs them
    /// and starts a fresh session instead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decryption
                | Self::Compression(_)
                | Self::Deserialization(_)
                | Self::InvalidCookie(_)
                | Self::Expired(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_errors_are_recoverable() {
        assert!(SessionError::Decryption.is_recoverable());
        assert!(SessionError::InvalidCookie("bad magic".into()).is_recoverable());
        assert!(SessionError::Expired(Utc::now()).is_recoverable());
    }

    #[test]
    fn test_backend_errors_are_not_recoverable() {
        assert!(!SessionError::Backend("down".into()).is_recoverable());
        assert!(!SessionError::CookieTooLarge { size: 5000, max: 4096 }.is_recoverable());
        assert!(!SessionError::Interrupted.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::CookieTooLarge { size: 5000, max: 4096 };
        assert_eq!(err.to_string(), "Cookie size 5000 is greater than max 4096");
    }
}
