//! Launching and supervising the external worker process.

pub mod error;
pub mod mock;
pub mod runner;

pub use error::ProcessError;
pub use mock::MockWorkerLauncher;
pub use runner::{ExitStatus, TokioWorkerLauncher, WorkerCommand, WorkerLauncher, WorkerProcess};

use std::sync::Arc;

/// Launcher that spawns real OS processes.
pub fn production() -> Arc<dyn WorkerLauncher> {
    Arc::new(TokioWorkerLauncher)
}
