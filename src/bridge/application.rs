//! One worker process and the socket session with it.

use crate::bridge::executable;
use crate::bridge::handler::OutputHandler;
use crate::bridge::partition::PartitionSlot;
use crate::config::{keys, JobConf, PipesConfig};
use crate::error::{ErrorCode, PipesError, Result};
use crate::protocol::digest::Challenge;
use crate::protocol::{BinaryDownlink, DownwardProtocol, UplinkReader, UpwardProtocol};
use crate::subprocess::{self, WorkerLauncher, WorkerProcess};
use crate::task::{MemoryRecordWriter, ProgressCell, RecordWriter, TaskContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How long a worker gets to exit by itself once the downlink is closed.
const WORKER_EXIT_GRACE: Duration = Duration::from_millis(500);

pub struct ApplicationBuilder {
    conf: JobConf,
    context: Arc<dyn TaskContext>,
    output: Option<Box<dyn RecordWriter>>,
    progress_cell: Option<ProgressCell>,
    partition_slot: PartitionSlot,
    launcher: Arc<dyn WorkerLauncher>,
}

impl ApplicationBuilder {
    pub fn new(conf: JobConf, context: Arc<dyn TaskContext>) -> Self {
        Self {
            conf,
            context,
            output: None,
            progress_cell: None,
            partition_slot: PartitionSlot::new(),
            launcher: subprocess::production(),
        }
    }

    /// Where OUTPUT and PARTITIONED_OUTPUT records go.
    pub fn output(mut self, output: Box<dyn RecordWriter>) -> Self {
        self.output = Some(output);
        self
    }

    /// Progress reported by the worker is stored here instead of in the handler.
    pub fn progress_cell(mut self, cell: ProgressCell) -> Self {
        self.progress_cell = Some(cell);
        self
    }

    /// Share the override slot with the partitioner that consumes it.
    pub fn partition_slot(mut self, slot: PartitionSlot) -> Self {
        self.partition_slot = slot;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Launch the worker, accept its connection and run the handshake.
    ///
    /// On success the worker has been sent START and SET_JOB_CONF and is
    /// ready for RUN_MAP or RUN_REDUCE.
    pub async fn start(self) -> Result<Application> {
        let config = PipesConfig::from_job_conf(&self.conf)?;
        let work_dir = self.context.work_dir().to_path_buf();

        let program = executable::resolve_executable(&config.executable, &work_dir)?;
        executable::make_executable(&program).await?;

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();

        let secret_file = work_dir.join(keys::SECRET_FILE_NAME);
        write_secret_file(&secret_file, self.context.job_secret()).await?;

        let command = executable::worker_command(
            &program,
            config.interpreter.as_deref(),
            &work_dir,
            port,
            &secret_file,
        );

        tracing::info!(
            attempt = %self.context.attempt_id(),
            "Starting worker {} on port {}",
            executable::describe(&command),
            port
        );

        let mut process = match self.launcher.launch(command).await {
            Ok(process) => process,
            Err(e) => {
                remove_secret_file(&secret_file).await;
                return Err(e.into());
            }
        };

        let stream = match accept_worker(&listener, process.as_mut()).await {
            Ok(stream) => stream,
            Err(e) => {
                abandon(process, &secret_file).await;
                return Err(e);
            }
        };
        drop(listener);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle on worker socket: {}", e);
        }
        let (read_half, write_half) = stream.into_split();

        let handler = Arc::new(OutputHandler::new(
            self.output
                .unwrap_or_else(|| Box::new(MemoryRecordWriter::new()) as Box<dyn RecordWriter>),
            Arc::clone(&self.context),
            self.partition_slot,
            self.progress_cell,
        ));
        let uplink =
            UplinkReader::new(read_half, Arc::clone(&handler) as Arc<dyn UpwardProtocol>).spawn();

        let mut downlink = BinaryDownlink::new(write_half);
        if config.preserve_command_file {
            let path = work_dir.join(keys::COMMAND_FILE_NAME);
            match tokio::fs::File::create(&path).await {
                Ok(file) => {
                    tracing::debug!("Preserving downward commands in {}", path.display());
                    downlink = downlink.with_command_log(file);
                }
                Err(e) => tracing::warn!("Cannot create {}: {}", path.display(), e),
            }
        }

        let mut application = Application {
            config,
            handler,
            downlink,
            uplink: Some(uplink),
            process: Some(process),
            secret_file: Some(secret_file),
            cleaned_up: false,
        };

        if let Err(e) = application
            .handshake(&self.conf, self.context.job_secret())
            .await
        {
            application.cleanup().await;
            return Err(e);
        }
        Ok(application)
    }
}

/// A running worker with an authenticated connection.
pub struct Application {
    config: PipesConfig,
    handler: Arc<OutputHandler>,
    downlink: BinaryDownlink<OwnedWriteHalf>,
    uplink: Option<JoinHandle<()>>,
    process: Option<Box<dyn WorkerProcess>>,
    secret_file: Option<PathBuf>,
    cleaned_up: bool,
}

impl Application {
    async fn handshake(&mut self, conf: &JobConf, secret: &[u8]) -> Result<()> {
        let challenge = Challenge::new(secret)?;
        self.handler
            .expect_digest(challenge.expected_response.clone());

        self.downlink
            .authenticate(&challenge.digest, &challenge.challenge)
            .await?;
        self.downlink.flush().await?;
        self.handler
            .wait_for_authentication_within(self.config.auth_timeout)
            .await?;
        tracing::debug!("Worker authenticated");

        self.downlink.start().await?;
        self.downlink.set_job_conf(conf).await?;
        Ok(())
    }

    pub fn config(&self) -> &PipesConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<OutputHandler> {
        &self.handler
    }

    /// The channel to the worker.
    pub fn downlink(&mut self) -> &mut dyn DownwardProtocol {
        &mut self.downlink
    }

    /// Flush outstanding commands and block until the worker is done.
    pub async fn wait_for_finish(&mut self) -> Result<bool> {
        if let Err(e) = self.downlink.flush().await {
            return Err(self.handler.record_failure(e));
        }
        let finished = self
            .handler
            .wait_for_finish_within(self.config.finish_timeout)
            .await?;
        self.handler.close_output()?;
        Ok(finished)
    }

    /// Fail the attempt with `cause` and tell the worker to stop.
    pub async fn abort(&mut self, cause: PipesError) -> PipesError {
        tracing::warn!("Aborting task attempt: {}", cause);
        let effective = self.handler.record_failure(cause);

        if let Err(e) = self.downlink.abort().await {
            tracing::debug!("Could not send ABORT: {}", e);
        } else if let Err(e) = self.downlink.flush().await {
            tracing::debug!("Could not flush ABORT: {}", e);
        }

        PipesError::worker_with_code(ErrorCode::WORKER_ABORTED, "Pipe child exception")
            .with_source(effective)
    }

    /// Release the connection, the worker and the secret file.
    pub async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        if let Err(e) = self.downlink.close().await {
            tracing::debug!("Closing downlink failed: {}", e);
        }
        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }
        if let Some(mut process) = self.process.take() {
            reap(process.as_mut()).await;
        }
        if let Some(path) = self.secret_file.take() {
            remove_secret_file(&path).await;
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        if self.cleaned_up {
            return;
        }
        tracing::debug!("Application dropped without cleanup, killing worker");
        if let Some(uplink) = self.uplink.take() {
            uplink.abort();
        }
        if let Some(process) = self.process.as_mut() {
            process.start_kill();
        }
        if let Some(path) = self.secret_file.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn write_secret_file(path: &Path, secret: &[u8]) -> Result<()> {
    tokio::fs::write(path, secret).await.map_err(|e| {
        PipesError::authentication_with_code(
            ErrorCode::AUTH_SECRET_UNAVAILABLE,
            format!("Cannot write job secret to {}", path.display()),
        )
        .with_source(e)
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

async fn remove_secret_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Cannot remove {}: {}", path.display(), e),
    }
}

/// Accept the worker's connection unless the worker exits first.
async fn accept_worker(listener: &TcpListener, process: &mut dyn WorkerProcess) -> Result<TcpStream> {
    tokio::select! {
        accepted = listener.accept() => {
            let (stream, peer) = accepted?;
            tracing::debug!("Worker connected from {}", peer);
            Ok(stream)
        }
        status = process.wait() => {
            let status = status?;
            let err = PipesError::worker_with_code(
                ErrorCode::WORKER_EXITED,
                format!("Worker exited with {} before connecting", status),
            );
            Err(match status.code() {
                Some(code) => err.with_exit_code(code),
                None => err,
            })
        }
    }
}

async fn reap(process: &mut dyn WorkerProcess) {
    match tokio::time::timeout(WORKER_EXIT_GRACE, process.wait()).await {
        Ok(Ok(status)) if status.success() => tracing::debug!("Worker exited cleanly"),
        Ok(Ok(status)) => tracing::info!("Worker exited with {}", status),
        Ok(Err(e)) => tracing::warn!("Cannot reap worker: {}", e),
        Err(_) => {
            tracing::debug!("Worker still running, killing it");
            if let Err(e) = process.kill().await {
                tracing::warn!("Cannot kill worker: {}", e);
            }
            if let Ok(status) = process.wait().await {
                tracing::debug!("Worker terminated with {}", status);
            }
        }
    }
}

async fn abandon(mut process: Box<dyn WorkerProcess>, secret_file: &Path) {
    if let Err(e) = process.kill().await {
        tracing::debug!("Cannot kill worker: {}", e);
    }
    remove_secret_file(secret_file).await;
}
