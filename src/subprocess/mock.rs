use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use super::error::ProcessError;
use super::runner::{ExitStatus, WorkerCommand, WorkerLauncher, WorkerProcess};

type Behaviour = Arc<dyn Fn(WorkerCommand) -> BoxFuture<'static, i32> + Send + Sync>;

/// Launcher that runs the "worker" as a task inside the current runtime.
///
/// The closure receives the command exactly as the bridge built it, so it can
/// read the port and secret location from `command.env`, and its return value
/// becomes the exit code.
#[derive(Clone)]
pub struct MockWorkerLauncher {
    behaviour: Option<Behaviour>,
    failure: Option<String>,
    call_history: Arc<Mutex<Vec<WorkerCommand>>>,
}

impl MockWorkerLauncher {
    pub fn new<F, Fut>(behaviour: F) -> Self
    where
        F: Fn(WorkerCommand) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = i32> + Send + 'static,
    {
        Self {
            behaviour: Some(Arc::new(move |command| Box::pin(behaviour(command)))),
            failure: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A launcher whose every launch fails.
    pub fn failing(message: &str) -> Self {
        Self {
            behaviour: None,
            failure: Some(message.to_string()),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_call_history(&self) -> Vec<WorkerCommand> {
        self.call_history
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn launch_count(&self) -> usize {
        self.get_call_history().len()
    }
}

#[async_trait]
impl WorkerLauncher for MockWorkerLauncher {
    async fn launch(&self, command: WorkerCommand) -> Result<Box<dyn WorkerProcess>, ProcessError> {
        if let Ok(mut calls) = self.call_history.lock() {
            calls.push(command.clone());
        }

        if let Some(message) = &self.failure {
            return Err(ProcessError::MockFailure(message.clone()));
        }
        let behaviour = self
            .behaviour
            .clone()
            .ok_or_else(|| ProcessError::MockFailure("no behaviour configured".to_string()))?;

        let handle = tokio::spawn(behaviour(command));
        Ok(Box::new(MockWorker {
            handle: Some(handle),
            status: None,
        }))
    }
}

struct MockWorker {
    handle: Option<JoinHandle<i32>>,
    status: Option<ExitStatus>,
}

#[async_trait]
impl WorkerProcess for MockWorker {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = &self.status {
            return Ok(status.clone());
        }
        let status = match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(0) => ExitStatus::Success,
                Ok(code) => ExitStatus::Error(code),
                Err(e) if e.is_cancelled() => ExitStatus::Signal(9),
                Err(e) => return Err(ProcessError::MockFailure(e.to_string())),
            },
            None => ExitStatus::Signal(9),
        };
        self.status = Some(status.clone());
        Ok(status)
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.start_kill();
        Ok(())
    }

    fn start_kill(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
