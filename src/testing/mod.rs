//! Testing utilities: an in-process worker that speaks the pipes protocol.

pub mod fake_worker;

pub use fake_worker::{FakeWorker, Transcript};

use crate::task::LocalTaskContext;
use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;

/// Task context rooted in a fresh temporary work directory.
pub struct TestContext {
    pub context: Arc<LocalTaskContext>,
    pub temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let context = Arc::new(LocalTaskContext::new(
            "attempt_local_0001_m_000000_0",
            temp_dir.path(),
        ));
        Ok(Self { context, temp_dir })
    }
}
