use thiserror::Error;

/// Application-wide error types for jobhunter.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed before a status code was received.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// A candidate record failed field validation.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Missing or malformed configuration value.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error was raised by the transport (no response
    /// was received). Transport errors are always eligible for retry.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_) | AppError::NetworkError(_) | AppError::Timeout(_)
        )
    }

    /// Stable label for this error, used as the metric cause/reason.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::HttpError(_) => "http_error",
            AppError::NetworkError(_) => "network_error",
            AppError::Timeout(_) => "timeout",
            AppError::ValidationError(_) => "validation_error",
            AppError::ConfigError(_) => "config_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::DatabaseError(_) => "database_error",
            AppError::Generic(_) => "generic",
        }
    }
}
