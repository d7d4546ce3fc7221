//! Error types for feedrelay.

use thiserror::Error;

/// Common error type for feedrelay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Invalid input at the command boundary (malformed cron, bad URL,
    /// bad route). No state is mutated when this is returned.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown endpoint or subscription index.
    #[error("{0} not found")]
    NotFound(String),

    /// Network-level feed retrieval failure (timeout, connection error,
    /// non-success status). Scoped to a single tick.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Unparseable feed payload. Scoped to a single tick.
    #[error("parse error: {0}")]
    Parse(String),

    /// Host platform send failure. Logged; the dedup cursor is not
    /// rolled back.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Persisted-state load or flush failure. Fatal at startup, logged
    /// after.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for feedrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = RelayError::Validation("bad cron expression".to_string());
        assert_eq!(err.to_string(), "validation error: bad cron expression");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = RelayError::NotFound("endpoint 3".to_string());
        assert_eq!(err.to_string(), "endpoint 3 not found");
    }

    #[test]
    fn test_fetch_error_display() {
        let err = RelayError::Fetch("HTTP error: 500".to_string());
        assert_eq!(err.to_string(), "fetch error: HTTP error: 500");
    }

    #[test]
    fn test_parse_error_display() {
        let err = RelayError::Parse("unexpected EOF".to_string());
        assert_eq!(err.to_string(), "parse error: unexpected EOF");
    }

    #[test]
    fn test_delivery_error_display() {
        let err = RelayError::Delivery("send rejected".to_string());
        assert_eq!(err.to_string(), "delivery error: send rejected");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(RelayError::Storage("corrupt state".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
