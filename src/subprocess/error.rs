use crate::error::{ErrorCode, PipesError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Worker executable not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process terminated by signal {0}")]
    Signal(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mock worker failed: {0}")]
    MockFailure(String),
}

impl From<ProcessError> for PipesError {
    fn from(err: ProcessError) -> Self {
        let code = match &err {
            ProcessError::NotFound(_) => ErrorCode::WORKER_EXECUTABLE_NOT_FOUND,
            ProcessError::SpawnFailed { .. } | ProcessError::MockFailure(_) => {
                ErrorCode::WORKER_SPAWN_FAILED
            }
            ProcessError::Signal(_) => ErrorCode::WORKER_EXITED,
            ProcessError::Io(_) => ErrorCode::WORKER_GENERIC,
        };
        PipesError::worker_with_code(code, err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_conversion() {
        let err: PipesError = ProcessError::NotFound("/opt/wc".to_string()).into();
        assert_eq!(err.code(), ErrorCode::WORKER_EXECUTABLE_NOT_FOUND);
        assert!(err.to_string().contains("/opt/wc"));

        let err: PipesError = ProcessError::SpawnFailed {
            program: "wc".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::WORKER_SPAWN_FAILED);
        assert_eq!(err.exit_code(), 6);
    }
}
