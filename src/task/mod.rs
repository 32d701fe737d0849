//! Host-side task plumbing: the task context, record sources/sinks and the
//! map/reduce drivers that feed the worker.

pub mod map_task;
pub mod records;
pub mod reduce_task;

use crate::bridge::counters::{Counter, Counters};
use crate::protocol::digest;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use map_task::MapTask;
pub use records::{
    MemoryRecordWriter, PartitionedCollector, PipedProgressReader, ProgressCell, RecordReader,
    RecordWriter, TextLineReader, VecRecordReader, NULL_WRITABLE, TEXT,
};
pub use reduce_task::ReduceTask;

/// What a running task attempt exposes to the bridge.
pub trait TaskContext: Send + Sync {
    fn attempt_id(&self) -> &str;
    fn work_dir(&self) -> &Path;
    /// Secret shared with the worker for the authentication handshake.
    fn job_secret(&self) -> &[u8];
    fn set_status(&self, status: &str);
    fn status(&self) -> String;
    fn counter(&self, group: &str, name: &str) -> Counter;
}

/// In-process task context.
#[derive(Debug)]
pub struct LocalTaskContext {
    attempt_id: String,
    work_dir: PathBuf,
    secret: Vec<u8>,
    status: Mutex<String>,
    counters: Counters,
}

impl LocalTaskContext {
    /// Context with a freshly generated job secret.
    pub fn new(attempt_id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self::with_secret(attempt_id, work_dir, digest::generate_secret())
    }

    pub fn with_secret(
        attempt_id: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            work_dir: work_dir.into(),
            secret: secret.into(),
            status: Mutex::new(String::new()),
            counters: Counters::new(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

impl TaskContext for LocalTaskContext {
    fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn job_secret(&self) -> &[u8] {
        &self.secret
    }

    fn set_status(&self, status: &str) {
        tracing::debug!(attempt = %self.attempt_id, "status: {}", status);
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status.to_string();
    }

    fn status(&self) -> String {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn counter(&self, group: &str, name: &str) -> Counter {
        self.counters.find_counter(group, name)
    }
}
