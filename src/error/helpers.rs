use super::{ErrorCode, PipesError};
use std::path::Path;

/// Extension trait for convenient error conversion
pub trait ErrorExt<T> {
    /// Convert to PipesError with context
    fn to_pipes(self, context: impl Into<String>) -> Result<T, PipesError>;

    /// Convert to PipesError with specific error type
    fn to_config_error(self, message: impl Into<String>) -> Result<T, PipesError>;
    fn to_protocol_error(self, message: impl Into<String>) -> Result<T, PipesError>;
    fn to_serialization_error(self, message: impl Into<String>) -> Result<T, PipesError>;
    fn to_worker_error(self, message: impl Into<String>) -> Result<T, PipesError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn to_pipes(self, context: impl Into<String>) -> Result<T, PipesError> {
        self.map_err(|e| PipesError::io(context).with_source(e))
    }

    fn to_config_error(self, message: impl Into<String>) -> Result<T, PipesError> {
        self.map_err(|e| PipesError::config(message).with_source(e))
    }

    fn to_protocol_error(self, message: impl Into<String>) -> Result<T, PipesError> {
        self.map_err(|e| PipesError::protocol(message).with_source(e))
    }

    fn to_serialization_error(self, message: impl Into<String>) -> Result<T, PipesError> {
        self.map_err(|e| PipesError::serialization(message).with_source(e))
    }

    fn to_worker_error(self, message: impl Into<String>) -> Result<T, PipesError> {
        self.map_err(|e| PipesError::worker(message).with_source(e))
    }
}

/// Helper functions for common error scenarios
pub mod common {
    use super::*;

    pub fn missing_config(key: &str) -> PipesError {
        PipesError::config_with_code(
            ErrorCode::CONFIG_MISSING_REQUIRED,
            format!("Required key '{}' is not set", key),
            Some(key.to_string()),
        )
    }

    pub fn invalid_config(key: &str, value: &str, expected: &str) -> PipesError {
        PipesError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!("'{}' is not a valid value, expected {}", value, expected),
            Some(key.to_string()),
        )
    }

    pub fn unregistered_counter(id: u32) -> PipesError {
        PipesError::protocol_with_code(
            ErrorCode::PROTOCOL_UNREGISTERED_COUNTER,
            format!("Counter id {} incremented before it was registered", id),
        )
    }

    pub fn out_of_order(command: &str, reason: &str) -> PipesError {
        PipesError::protocol_with_code(
            ErrorCode::PROTOCOL_OUT_OF_ORDER,
            format!("Cannot send {}: {}", command, reason),
        )
    }

    pub fn digest_mismatch() -> PipesError {
        PipesError::authentication_with_code(
            ErrorCode::AUTH_DIGEST_MISMATCH,
            "Worker answered the challenge with the wrong digest",
        )
    }

    pub fn worker_timeout(waiting_for: &str, millis: u64) -> PipesError {
        PipesError::worker_with_code(
            ErrorCode::WORKER_TIMEOUT,
            format!("Timed out after {} ms waiting for {}", millis, waiting_for),
        )
    }

    pub fn split_file_not_found(path: &Path) -> PipesError {
        PipesError::split_with_code(
            ErrorCode::SPLIT_NOT_FOUND,
            format!("External split file {} does not exist", path.display()),
            Some(path.to_path_buf()),
        )
    }
}
