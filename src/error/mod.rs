use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub mod codes;
pub mod helpers;

pub use codes::{describe_error_code, ErrorCode};
pub use helpers::{common, ErrorExt};

/// Shared, cloneable error source.
///
/// A failure captured on the uplink is handed to every waiter, so the
/// whole error (source chain included) has to be cheap to clone.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync>;

/// The unified error type for the bridge
#[derive(Error, Debug, Clone)]
pub enum PipesError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        key: Option<String>,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("[E{code:04}] Protocol violation: {message}")]
    Protocol {
        code: u16,
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("[E{code:04}] Authentication failed: {message}")]
    Authentication {
        code: u16,
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("[E{code:04}] Serialization error: {message}")]
    Serialization {
        code: u16,
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("[E{code:04}] Worker error: {message}")]
    Worker {
        code: u16,
        message: String,
        exit_code: Option<i32>,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("[E{code:04}] Split error: {message}")]
    Split {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("[E{code:04}] {message}")]
    Io {
        code: u16,
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },
}

impl PipesError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message, None)
    }

    /// Create a configuration error with specific code and offending key
    pub fn config_with_code(code: u16, message: impl Into<String>, key: Option<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            key,
            source: None,
        }
    }

    /// Create a protocol violation with default code
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::protocol_with_code(ErrorCode::PROTOCOL_GENERIC, message)
    }

    pub fn protocol_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an authentication failure with default code
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::authentication_with_code(ErrorCode::AUTH_GENERIC, message)
    }

    pub fn authentication_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Authentication {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a serialization error with default code
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::serialization_with_code(ErrorCode::SERIAL_GENERIC, message)
    }

    pub fn serialization_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Serialization {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a worker error with default code
    pub fn worker(message: impl Into<String>) -> Self {
        Self::worker_with_code(ErrorCode::WORKER_GENERIC, message)
    }

    pub fn worker_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Worker {
            code,
            message: message.into(),
            exit_code: None,
            source: None,
        }
    }

    /// Create a split error with default code
    pub fn split(message: impl Into<String>) -> Self {
        Self::split_with_code(ErrorCode::SPLIT_GENERIC, message, None)
    }

    pub fn split_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Split {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create a generic IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::io_with_code(ErrorCode::IO_GENERIC, message)
    }

    pub fn io_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Io {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let source: ErrorSource = Arc::from(source.into());
        *self.source_slot() = Some(source);
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        let message = self.message_mut();
        *message = format!("{}: {}", message, context);
        self
    }

    /// Set the exit code for a worker error
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        if let Self::Worker {
            exit_code: ref mut ec,
            ..
        } = self
        {
            *ec = Some(exit_code);
        }
        self
    }

    fn source_slot(&mut self) -> &mut Option<ErrorSource> {
        match self {
            Self::Config { source, .. }
            | Self::Protocol { source, .. }
            | Self::Authentication { source, .. }
            | Self::Serialization { source, .. }
            | Self::Worker { source, .. }
            | Self::Split { source, .. }
            | Self::Io { source, .. } => source,
        }
    }

    fn message_mut(&mut self) -> &mut String {
        match self {
            Self::Config { message, .. }
            | Self::Protocol { message, .. }
            | Self::Authentication { message, .. }
            | Self::Serialization { message, .. }
            | Self::Worker { message, .. }
            | Self::Split { message, .. }
            | Self::Io { message, .. } => message,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Protocol { .. } => 3,
            Self::Authentication { .. } => 4,
            Self::Serialization { .. } => 5,
            Self::Worker { .. } => 6,
            Self::Split { .. } => 7,
            Self::Io { .. } => 1,
        }
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Protocol { code, .. }
            | Self::Authentication { code, .. }
            | Self::Serialization { code, .. }
            | Self::Worker { code, .. }
            | Self::Split { code, .. }
            | Self::Io { code, .. } => *code,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, key, .. } => match key {
                Some(k) => format!("Configuration problem with '{}': {}", k, message),
                None => format!("Configuration problem: {}", message),
            },
            Self::Protocol { message, .. } => format!("Worker broke the protocol: {}", message),
            Self::Authentication { message, .. } => {
                format!("Worker authentication failed: {}", message)
            }
            Self::Serialization { message, .. } => format!("Record encoding failed: {}", message),
            Self::Worker {
                message, exit_code, ..
            } => match exit_code {
                Some(code) => format!("Worker failed with exit code {}: {}", code, message),
                None => format!("Worker failed: {}", message),
            },
            Self::Split { message, path, .. } => match path {
                Some(p) => format!("Split file {}: {}", p.display(), message),
                None => format!("Split error: {}", message),
            },
            Self::Io { message, .. } => message.clone(),
        }
    }

    /// Errors caused by the worker's behaviour on the wire
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Type alias for Results using PipesError
pub type Result<T> = std::result::Result<T, PipesError>;

impl From<std::io::Error> for PipesError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let error = match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                PipesError::worker_with_code(
                    ErrorCode::WORKER_CONNECTION_LOST,
                    "Connection to worker lost",
                )
            }
            ErrorKind::UnexpectedEof => PipesError::protocol_with_code(
                ErrorCode::PROTOCOL_UNEXPECTED_EOF,
                "Stream ended in the middle of a message",
            ),
            ErrorKind::TimedOut => {
                PipesError::worker_with_code(ErrorCode::WORKER_TIMEOUT, "Operation timed out")
            }
            ErrorKind::NotFound => {
                PipesError::io_with_code(ErrorCode::IO_NOT_FOUND, "File or directory not found")
            }
            ErrorKind::PermissionDenied => {
                PipesError::io_with_code(ErrorCode::IO_PERMISSION_DENIED, "Permission denied")
            }
            _ => PipesError::io("IO operation failed"),
        };

        error.with_source(err)
    }
}

impl From<apache_avro::Error> for PipesError {
    fn from(err: apache_avro::Error) -> Self {
        PipesError::serialization("Avro operation failed").with_source(err)
    }
}

impl From<serde_json::Error> for PipesError {
    fn from(err: serde_json::Error) -> Self {
        PipesError::config_with_code(ErrorCode::CONFIG_PARSE_ERROR, "Invalid JSON", None)
            .with_source(err)
    }
}

impl From<toml::de::Error> for PipesError {
    fn from(err: toml::de::Error) -> Self {
        PipesError::config_with_code(ErrorCode::CONFIG_PARSE_ERROR, "Invalid TOML", None)
            .with_source(err)
    }
}
