//! SDK error types

use thiserror::Error;

/// SDK error type
#[derive(Error, Debug)]
pub enum SdkError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(#[from] crystalvalue_runtime::RuntimeError),

    /// Core error
    #[error("Core error: {0}")]
    CoreError(#[from] crystalvalue_core::CoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No model id was passed and none has been trained in this run
    #[error("No model available: pass a model id or train a model first")]
    MissingModel,

    /// No endpoint id was passed and no model has been deployed in this run
    #[error("No endpoint available: pass an endpoint id or deploy a model first")]
    MissingEndpoint,
}

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crystalvalue_runtime::RuntimeError;

    #[test]
    fn test_config_error() {
        let error = SdkError::ConfigError("days_lookback must be at least 1".to_string());
        assert!(error.to_string().contains("Configuration error"));
        assert!(error.to_string().contains("days_lookback"));
    }

    #[test]
    fn test_runtime_error_conversion() {
        let runtime = RuntimeError::NoFeaturesDetected("transactions".to_string());
        let sdk_error: SdkError = runtime.into();
        assert!(matches!(
            sdk_error,
            SdkError::RuntimeError(RuntimeError::NoFeaturesDetected(_))
        ));
        assert!(sdk_error.to_string().contains("transactions"));
    }

    #[test]
    fn test_missing_model_and_endpoint() {
        assert!(SdkError::MissingModel.to_string().contains("train a model"));
        assert!(SdkError::MissingEndpoint
            .to_string()
            .contains("deploy a model"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "query.sql");
        let sdk_error: SdkError = io_error.into();
        assert!(sdk_error.to_string().contains("I/O error"));
    }
}
