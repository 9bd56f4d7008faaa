use datagovmy_api::{ApiError, UnknownSource};
use thiserror::Error;

/// Errors that can occur when using the datagovmy client
#[derive(Error, Debug)]
pub enum DataGovMyError {
    /// Error from the upstream API
    #[error(transparent)]
    Api(#[from] ApiError),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// File I/O error
    #[error("File operation failed: {0}")]
    IoError(#[from] std::io::Error),

    /// Dataset index could not be decoded
    #[error("Invalid dataset index: {0}")]
    IndexError(#[from] serde_json::Error),

    /// Invalid URL error
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Validation error
    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

impl DataGovMyError {
    /// Create a new configuration error
    pub fn config_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation_error<S: Into<String>>(message: S) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }
}

impl From<UnknownSource> for DataGovMyError {
    fn from(err: UnknownSource) -> Self {
        Self::validation_error(err.to_string())
    }
}

/// Type alias for Results using DataGovMyError
pub type Result<T> = std::result::Result<T, DataGovMyError>;
