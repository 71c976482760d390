//! Error handling for the advisory engine.

use thiserror::Error;

/// Main error type for the advisory engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (misordered fuse thresholds, bad amounts, ...).
    /// The only class that is fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Data-related errors (e.g. missing or malformed market data)
    #[error("Data error: {0}")]
    DataError(String),

    /// Advisory service errors (qualitative review unavailable/garbled)
    #[error("Advisory error: {0}")]
    AdvisoryError(String),

    /// Ledger persistence errors
    #[error("Ledger error: {0}")]
    LedgerError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Request errors
    #[error("Request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for the advisory engine
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

// Allow automatic conversion from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_error = Error::ConfigError("missing field".to_string());
        assert_eq!(
            config_error.to_string(),
            "Configuration error: missing field"
        );

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let wrapped_io_error = Error::from(io_error);
        assert!(wrapped_io_error.to_string().contains("I/O error"));

        let string_error = Error::from("custom error");
        assert_eq!(string_error.to_string(), "Error: custom error");
    }

    #[test]
    fn test_result_type() {
        fn might_fail() -> Result<()> {
            Ok(())
        }

        assert!(might_fail().is_ok());
    }
}
