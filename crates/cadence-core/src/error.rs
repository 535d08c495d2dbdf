//! Cross-cutting error type for bootstrap concerns (configuration, telemetry).

use thiserror::Error;

/// A specialized `Result` type for Cadence bootstrap operations.
pub type CadenceResult<T> = Result<T, CadenceError>;

/// Errors raised outside the job engine proper: loading configuration,
/// installing the tracing subscriber, wiring the process together.
#[derive(Error, Debug)]
pub enum CadenceError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Telemetry could not be initialized
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CadenceError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Telemetry(_) => "TELEMETRY_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }
}

impl From<serde_json::Error> for CadenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CadenceError::configuration("x").error_code(), "CONFIGURATION_ERROR");
        assert_eq!(CadenceError::validation("x").error_code(), "VALIDATION_ERROR");
        assert_eq!(CadenceError::Telemetry("x".into()).error_code(), "TELEMETRY_ERROR");
        assert_eq!(CadenceError::internal("x").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_error_display() {
        let err = CadenceError::configuration("missing redis url");
        assert!(err.to_string().contains("missing redis url"));
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = CadenceError::from(json_err);
        assert!(matches!(err, CadenceError::Internal(_)));
    }

    #[test]
    fn test_from_anyhow() {
        let err: CadenceError = anyhow::anyhow!("boom").into();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(err.to_string(), "boom");
    }
}
