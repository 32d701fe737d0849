use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::task::JoinHandle;

use super::error::ProcessError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    /// `program` with no arguments, inheriting the host environment.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit code 0"),
            ExitStatus::Error(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// A running worker.
#[async_trait]
pub trait WorkerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Resolves once the worker has exited.
    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    /// Kill the worker and reap it.
    async fn kill(&mut self) -> Result<(), ProcessError>;

    /// Request termination without waiting (used from `Drop`).
    fn start_kill(&mut self);
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, command: WorkerCommand) -> Result<Box<dyn WorkerProcess>, ProcessError>;
}

type LineStream = Pin<Box<dyn Stream<Item = Result<String, ProcessError>> + Send>>;

pub struct TokioWorkerLauncher;

impl TokioWorkerLauncher {
    fn normalize_line(mut line: String) -> String {
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        line
    }

    fn create_line_stream<R>(reader: tokio::io::BufReader<R>) -> LineStream
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
    {
        use tokio::io::AsyncBufReadExt;

        Box::pin(futures::stream::unfold(reader, |mut reader| async move {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(Self::normalize_line(line)), reader)),
                Err(e) => Some((Err(ProcessError::Io(e)), reader)),
            }
        }))
    }

    /// Forward each output line of the worker to the log.
    fn forward_lines(mut lines: LineStream, program: String, stream: &'static str) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        tracing::info!(target: "pipes_bridge::worker", "[{} {}] {}", program, stream, line)
                    }
                    Err(e) => {
                        tracing::debug!("Stopped reading worker {}: {}", stream, e);
                        break;
                    }
                }
            }
        })
    }

    fn convert_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            return ExitStatus::Success;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Error(status.code().unwrap_or(-1))
    }

    fn log_command_start(command: &WorkerCommand) {
        tracing::info!(
            "Launching worker: {} {}",
            command.program,
            command.args.join(" ")
        );
        tracing::trace!("Worker environment overrides: {:?}", command.env.keys());
        if let Some(ref dir) = command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }
    }

    fn configure_command(command: &WorkerCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl WorkerLauncher for TokioWorkerLauncher {
    async fn launch(&self, command: WorkerCommand) -> Result<Box<dyn WorkerProcess>, ProcessError> {
        Self::log_command_start(&command);

        let mut child = Self::configure_command(&command)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ProcessError::NotFound(command.program.clone()),
                _ => ProcessError::SpawnFailed {
                    program: command.program.clone(),
                    source: e,
                },
            })?;

        let mut log_tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            log_tasks.push(Self::forward_lines(
                Self::create_line_stream(tokio::io::BufReader::new(stdout)),
                command.program.clone(),
                "stdout",
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            log_tasks.push(Self::forward_lines(
                Self::create_line_stream(tokio::io::BufReader::new(stderr)),
                command.program.clone(),
                "stderr",
            ));
        }

        tracing::debug!("Worker started with pid {:?}", child.id());
        Ok(Box::new(TokioWorker { child, log_tasks }))
    }
}

struct TokioWorker {
    child: tokio::process::Child,
    log_tasks: Vec<JoinHandle<()>>,
}

#[async_trait]
impl WorkerProcess for TokioWorker {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await?;
        Ok(TokioWorkerLauncher::convert_exit_status(status))
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        for task in self.log_tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }

    fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Could not signal worker: {}", e);
        }
        for task in &self.log_tasks {
            task.abort();
        }
    }
}
