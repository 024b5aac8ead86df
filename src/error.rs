//! Error types and handling for `ForecastKit`

use thiserror::Error;

/// Main error type for `ForecastKit`
///
/// Every variant carries an owned message so the error can be cloned and handed
/// to every caller waiting on the same coalesced request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Malformed zipcode, unknown zipcode, out-of-range coordinates
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// DNS, connection, timeout or HTTP status failures
    #[error("Transport failure: {message}")]
    TransportFailure { message: String },

    /// Feed XML is not well-formed or lacks required elements
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// A parameter does not line up with its time-layout
    #[error("Feed inconsistency: {message}")]
    FeedInconsistency { message: String },

    /// Store read or write failures
    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// General application errors
    #[error("Application error: {message}")]
    General { message: String },
}

impl ForecastError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Create a new malformed response error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Create a new feed inconsistency error
    pub fn inconsistency<S: Into<String>>(message: S) -> Self {
        Self::FeedInconsistency {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::PersistenceFailure {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new general error
    pub fn general<S: Into<String>>(message: S) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ForecastError::InvalidInput { message } => format!("Invalid input: {message}"),
            ForecastError::TransportFailure { .. } => {
                "Unable to reach the forecast service. Please check your internet connection."
                    .to_string()
            }
            ForecastError::MalformedResponse { .. } => {
                "The forecast service returned an unreadable response. Please try again later."
                    .to_string()
            }
            ForecastError::FeedInconsistency { message } => {
                format!("Some forecast values were skipped: {message}")
            }
            ForecastError::PersistenceFailure { .. } => {
                "Forecast store operation failed. You may need to clear the store directory."
                    .to_string()
            }
            ForecastError::Config { .. } => {
                "Configuration error. Please check your config file.".to_string()
            }
            ForecastError::General { message } => message.clone(),
        }
    }
}

impl From<std::io::Error> for ForecastError {
    fn from(err: std::io::Error) -> Self {
        ForecastError::persistence(format!("I/O error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let input_err = ForecastError::invalid_input("zipcode 1234");
        assert!(matches!(input_err, ForecastError::InvalidInput { .. }));

        let transport_err = ForecastError::transport("connection refused");
        assert!(matches!(transport_err, ForecastError::TransportFailure { .. }));

        let malformed_err = ForecastError::malformed("unexpected eof");
        assert!(matches!(malformed_err, ForecastError::MalformedResponse { .. }));
    }

    #[test]
    fn test_user_messages() {
        let input_err = ForecastError::invalid_input("unknown zipcode 00000");
        assert!(input_err.user_message().contains("00000"));

        let transport_err = ForecastError::transport("test");
        assert!(transport_err.user_message().contains("Unable to reach"));

        let general_err = ForecastError::general("plain message");
        assert_eq!(general_err.user_message(), "plain message");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ForecastError = io_err.into();
        assert!(matches!(err, ForecastError::PersistenceFailure { .. }));
    }
}
