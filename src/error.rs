use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the traffic relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration related errors (fatal at startup)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Body encoding/decoding errors (gzip framing, conflicting signals)
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Errors while relaying a request to the upstream
    #[error("Proxy error: {message}")]
    Proxy { message: String },

    /// Upstream connectivity errors (maps to 502)
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// Timeout errors (maps to 504)
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// Inbound body exceeded the configured cap (maps to 503)
    #[error("Payload too large: {message}")]
    PayloadTooLarge { message: String },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RelayError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a proxy error
    pub fn proxy<S: Into<String>>(message: S) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create a payload-too-large error
    pub fn payload_too_large<S: Into<String>>(message: S) -> Self {
        Self::PayloadTooLarge {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<hyper::Error> for RelayError {
    fn from(err: hyper::Error) -> Self {
        Self::Upstream {
            message: err.to_string(),
        }
    }
}

impl From<hyper::http::Error> for RelayError {
    fn from(err: hyper::http::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RelayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

/// Result type alias using RelayError
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::config("missing relay.target");
        assert_eq!(err.to_string(), "Configuration error: missing relay.target");

        let err = RelayError::timeout(Duration::from_secs(30), "upstream request");
        assert!(err.to_string().contains("30s"));
        assert!(err.to_string().contains("upstream request"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: RelayError = io_err.into();
        assert!(matches!(err, RelayError::Io { .. }));
    }
}
