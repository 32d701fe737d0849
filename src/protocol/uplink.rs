//! Worker-to-host channel.

use super::UpwardMessage;
use crate::error::{ErrorCode, PipesError, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Receiver of upward messages.
///
/// Implementations record protocol violations they detect themselves and
/// return them, which stops the reader.
pub trait UpwardProtocol: Send + Sync {
    fn output(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn partitioned_output(&self, partition: u32, key: &[u8], value: &[u8]) -> Result<()>;
    fn status(&self, text: &str) -> Result<()>;
    fn progress(&self, progress: f32) -> Result<()>;
    fn done(&self) -> Result<()>;
    fn register_counter(&self, id: u32, group: &str, name: &str) -> Result<()>;
    fn increment_counter(&self, id: u32, amount: i64) -> Result<()>;
    fn authenticate(&self, digest: &str) -> Result<()>;
    /// The channel itself broke (IO error, EOF before DONE, bad frame).
    fn failed(&self, cause: PipesError);
}

/// Apply one decoded message. Returns `true` once DONE was delivered.
pub fn dispatch(handler: &dyn UpwardProtocol, message: UpwardMessage<'_>) -> Result<bool> {
    match message {
        UpwardMessage::Output { key, value } => handler.output(&key, &value)?,
        UpwardMessage::PartitionedOutput {
            partition,
            key,
            value,
        } => handler.partitioned_output(partition, &key, &value)?,
        UpwardMessage::Status(text) => handler.status(&text)?,
        UpwardMessage::Progress(progress) => handler.progress(progress)?,
        UpwardMessage::RegisterCounter { id, group, name } => {
            handler.register_counter(id, &group, &name)?
        }
        UpwardMessage::IncrementCounter { id, amount } => {
            handler.increment_counter(id, amount)?
        }
        UpwardMessage::Authenticate(digest) => handler.authenticate(&digest)?,
        UpwardMessage::Done => {
            handler.done()?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Reads the upward stream and drives an [`UpwardProtocol`] until DONE or
/// the first error.
///
/// After a handler error the remaining frames are read and discarded until
/// DONE or EOF, so a worker blocked writing output can still make progress
/// and take the ABORT that follows.
pub struct UplinkReader<R> {
    reader: BufReader<R>,
    handler: Arc<dyn UpwardProtocol>,
}

impl<R> UplinkReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, handler: Arc<dyn UpwardProtocol>) -> Self {
        Self {
            reader: BufReader::new(reader),
            handler,
        }
    }

    /// Run on its own task; the handle is aborted during cleanup.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut messages = 0u64;
        loop {
            match UpwardMessage::read_from(&mut self.reader).await {
                Ok(Some(message)) => {
                    messages += 1;
                    tracing::trace!("Uplink received {:?}", message.message_type());
                    match dispatch(self.handler.as_ref(), message) {
                        Ok(true) => {
                            tracing::debug!("Uplink finished after {} messages", messages);
                            return;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            self.handler.failed(e);
                            self.drain().await;
                            return;
                        }
                    }
                }
                Ok(None) => {
                    self.handler.failed(PipesError::worker_with_code(
                        ErrorCode::WORKER_CONNECTION_LOST,
                        format!(
                            "Worker closed the connection before DONE ({} messages received)",
                            messages
                        ),
                    ));
                    return;
                }
                Err(e) => {
                    tracing::debug!("Uplink read failed: {}", e);
                    self.handler.failed(e);
                    return;
                }
            }
        }
    }

    async fn drain(&mut self) {
        let mut discarded = 0u64;
        loop {
            match UpwardMessage::read_from(&mut self.reader).await {
                Ok(Some(UpwardMessage::Done)) | Ok(None) | Err(_) => break,
                Ok(Some(_)) => discarded += 1,
            }
        }
        tracing::debug!("Uplink discarded {} messages after a failure", discarded);
    }
}
