//! Host-to-worker channel.

use super::{DownwardMessage, MessageType, PROTOCOL_VERSION};
use crate::config::JobConf;
use crate::error::{common, PipesError, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Commands the host sends to the worker.
///
/// Sends are fire-and-forget; an `Err` means the attempt cannot continue.
#[async_trait]
pub trait DownwardProtocol: Send {
    async fn authenticate(&mut self, digest: &str, challenge: &str) -> Result<()>;
    async fn start(&mut self) -> Result<()>;
    async fn set_job_conf(&mut self, conf: &JobConf) -> Result<()>;
    async fn set_input_types(&mut self, key_class: &str, value_class: &str) -> Result<()>;
    async fn run_map(&mut self, split: &[u8], num_reduces: u32, piped_input: bool) -> Result<()>;
    async fn map_item(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    async fn run_reduce(&mut self, partition: u32, piped_output: bool) -> Result<()>;
    async fn reduce_key(&mut self, key: &[u8]) -> Result<()>;
    async fn reduce_value(&mut self, value: &[u8]) -> Result<()>;
    async fn end_of_input(&mut self) -> Result<()>;
    async fn abort(&mut self) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Authentication, START and SET_JOB_CONF.
    Setup,
    Mapping { piped_input: bool, items_sent: bool },
    Reducing { key_sent: bool },
    InputClosed,
    Aborted,
    Shut,
}

/// Frames commands onto a byte stream, enforcing command order.
pub struct BinaryDownlink<W: AsyncWrite + Unpin + Send> {
    writer: BufWriter<W>,
    command_log: Option<BufWriter<tokio::fs::File>>,
    frame: Vec<u8>,
    phase: Phase,
    sent: u64,
}

impl<W: AsyncWrite + Unpin + Send> BinaryDownlink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            command_log: None,
            frame: Vec::with_capacity(256),
            phase: Phase::Setup,
            sent: 0,
        }
    }

    /// Also write every frame to `file` (the preserved command file).
    pub fn with_command_log(mut self, file: tokio::fs::File) -> Self {
        self.command_log = Some(BufWriter::new(file));
        self
    }

    /// Number of commands written so far.
    pub fn commands_sent(&self) -> u64 {
        self.sent
    }

    async fn send(&mut self, message: DownwardMessage<'_>) -> Result<()> {
        let message_type = message.message_type();
        if message_type == MessageType::MapItem || message_type == MessageType::ReduceValue {
            tracing::trace!("Sending {:?}", message_type);
        } else {
            tracing::debug!("Sending {:?}", message_type);
        }

        self.frame.clear();
        message.encode(&mut self.frame)?;
        self.writer.write_all(&self.frame).await?;
        if let Some(log) = self.command_log.as_mut() {
            log.write_all(&self.frame).await?;
        }
        self.sent += 1;
        Ok(())
    }

    fn reject(&self, command: &str) -> PipesError {
        let reason = match self.phase {
            Phase::Setup => "no RUN_MAP or RUN_REDUCE has been sent",
            Phase::Mapping { piped_input: false, .. } => "the worker reads its own input",
            Phase::Mapping { .. } => "the map phase is in progress",
            Phase::Reducing { key_sent: false } => "no REDUCE_KEY has been sent",
            Phase::Reducing { .. } => "the reduce phase is in progress",
            Phase::InputClosed => "input was already closed",
            Phase::Aborted => "the attempt was aborted",
            Phase::Shut => "the downlink is closed",
        };
        common::out_of_order(command, reason)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> DownwardProtocol for BinaryDownlink<W> {
    async fn authenticate(&mut self, digest: &str, challenge: &str) -> Result<()> {
        if self.phase != Phase::Setup {
            return Err(self.reject("AUTHENTICATION_REQ"));
        }
        self.send(DownwardMessage::Authenticate {
            digest: Cow::Borrowed(digest),
            challenge: Cow::Borrowed(challenge),
        })
        .await
    }

    async fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Setup {
            return Err(self.reject("START"));
        }
        self.send(DownwardMessage::Start {
            protocol_version: PROTOCOL_VERSION,
        })
        .await
    }

    async fn set_job_conf(&mut self, conf: &JobConf) -> Result<()> {
        if self.phase != Phase::Setup {
            return Err(self.reject("SET_JOB_CONF"));
        }
        let pairs = conf
            .iter()
            .map(|(k, v)| (Cow::Borrowed(k), Cow::Borrowed(v)))
            .collect();
        self.send(DownwardMessage::SetJobConf(pairs)).await
    }

    async fn set_input_types(&mut self, key_class: &str, value_class: &str) -> Result<()> {
        match self.phase {
            Phase::Mapping {
                piped_input: true,
                items_sent: false,
            } => {}
            _ => return Err(self.reject("SET_INPUT_TYPES")),
        }
        self.send(DownwardMessage::SetInputTypes {
            key_class: Cow::Borrowed(key_class),
            value_class: Cow::Borrowed(value_class),
        })
        .await
    }

    async fn run_map(&mut self, split: &[u8], num_reduces: u32, piped_input: bool) -> Result<()> {
        if self.phase != Phase::Setup {
            return Err(self.reject("RUN_MAP"));
        }
        self.send(DownwardMessage::RunMap {
            split: Cow::Borrowed(split),
            num_reduces: num_reduces as i32,
            piped_input,
        })
        .await?;
        self.phase = Phase::Mapping {
            piped_input,
            items_sent: false,
        };
        Ok(())
    }

    async fn map_item(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self.phase {
            Phase::Mapping {
                piped_input: true, ..
            } => {}
            _ => return Err(self.reject("MAP_ITEM")),
        }
        self.send(DownwardMessage::MapItem {
            key: Cow::Borrowed(key),
            value: Cow::Borrowed(value),
        })
        .await?;
        self.phase = Phase::Mapping {
            piped_input: true,
            items_sent: true,
        };
        Ok(())
    }

    async fn run_reduce(&mut self, partition: u32, piped_output: bool) -> Result<()> {
        if self.phase != Phase::Setup {
            return Err(self.reject("RUN_REDUCE"));
        }
        self.send(DownwardMessage::RunReduce {
            partition: partition as i32,
            piped_output,
        })
        .await?;
        self.phase = Phase::Reducing { key_sent: false };
        Ok(())
    }

    async fn reduce_key(&mut self, key: &[u8]) -> Result<()> {
        if !matches!(self.phase, Phase::Reducing { .. }) {
            return Err(self.reject("REDUCE_KEY"));
        }
        self.send(DownwardMessage::ReduceKey(Cow::Borrowed(key)))
            .await?;
        self.phase = Phase::Reducing { key_sent: true };
        Ok(())
    }

    async fn reduce_value(&mut self, value: &[u8]) -> Result<()> {
        if self.phase != (Phase::Reducing { key_sent: true }) {
            return Err(self.reject("REDUCE_VALUE"));
        }
        self.send(DownwardMessage::ReduceValue(Cow::Borrowed(value)))
            .await
    }

    async fn end_of_input(&mut self) -> Result<()> {
        if !matches!(self.phase, Phase::Mapping { .. } | Phase::Reducing { .. }) {
            return Err(self.reject("CLOSE"));
        }
        self.send(DownwardMessage::EndOfInput).await?;
        self.phase = Phase::InputClosed;
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        match self.phase {
            Phase::Aborted => Ok(()),
            Phase::Shut => Err(self.reject("ABORT")),
            _ => {
                self.phase = Phase::Aborted;
                self.send(DownwardMessage::Abort).await
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if self.phase == Phase::Shut {
            return Ok(());
        }
        self.writer.flush().await?;
        if let Some(log) = self.command_log.as_mut() {
            log.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Shut {
            return Ok(());
        }
        tracing::debug!("Closing downlink after {} commands", self.sent);
        self.phase = Phase::Shut;

        let flushed = self.writer.flush().await;
        if let Some(mut log) = self.command_log.take() {
            if let Err(e) = log.flush().await {
                tracing::warn!("Failed to flush command file: {}", e);
            }
        }
        flushed?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tokio::io::AsyncReadExt;

    async fn collect(mut reader: tokio::io::DuplexStream) -> Vec<DownwardMessage<'static>> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        let mut messages = Vec::new();
        while let Some(message) = DownwardMessage::read_from(&mut cursor).await.unwrap() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_map_session_frames_in_order() {
        let (host, worker) = tokio::io::duplex(64 * 1024);
        let mut downlink = BinaryDownlink::new(host);

        let mut conf = JobConf::new();
        conf.set("k", "v");

        downlink.authenticate("d", "c").await.unwrap();
        downlink.start().await.unwrap();
        downlink.set_job_conf(&conf).await.unwrap();
        downlink.run_map(b"split", 2, true).await.unwrap();
        downlink.set_input_types("K", "V").await.unwrap();
        downlink.map_item(b"a", b"1").await.unwrap();
        downlink.map_item(b"b", b"2").await.unwrap();
        downlink.end_of_input().await.unwrap();
        downlink.close().await.unwrap();

        let types: Vec<MessageType> = collect(worker)
            .await
            .iter()
            .map(DownwardMessage::message_type)
            .collect();
        assert_eq!(
            types,
            vec![
                MessageType::AuthenticationReq,
                MessageType::Start,
                MessageType::SetJobConf,
                MessageType::RunMap,
                MessageType::SetInputTypes,
                MessageType::MapItem,
                MessageType::MapItem,
                MessageType::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_items_rejected_before_run_and_after_close() {
        let (host, _worker) = tokio::io::duplex(1024);
        let mut downlink = BinaryDownlink::new(host);

        let err = downlink.map_item(b"k", b"v").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_OUT_OF_ORDER);

        downlink.run_map(b"", 1, true).await.unwrap();
        downlink.end_of_input().await.unwrap();

        let err = downlink.map_item(b"k", b"v").await.unwrap_err();
        assert!(err.to_string().contains("input was already closed"));
        assert!(downlink.end_of_input().await.is_err());
    }

    #[tokio::test]
    async fn test_map_items_need_piped_input() {
        let (host, _worker) = tokio::io::duplex(1024);
        let mut downlink = BinaryDownlink::new(host);

        downlink.run_map(b"", 1, false).await.unwrap();
        let err = downlink.map_item(b"k", b"v").await.unwrap_err();
        assert!(err.to_string().contains("reads its own input"));
        downlink.end_of_input().await.unwrap();
    }

    #[tokio::test]
    async fn test_input_types_only_before_first_item() {
        let (host, _worker) = tokio::io::duplex(1024);
        let mut downlink = BinaryDownlink::new(host);

        downlink.run_map(b"", 1, true).await.unwrap();
        downlink.map_item(b"k", b"v").await.unwrap();
        assert!(downlink.set_input_types("K", "V").await.is_err());
    }

    #[tokio::test]
    async fn test_reduce_value_requires_key() {
        let (host, worker) = tokio::io::duplex(64 * 1024);
        let mut downlink = BinaryDownlink::new(host);

        downlink.run_reduce(0, true).await.unwrap();
        assert!(downlink.reduce_value(b"orphan").await.is_err());

        downlink.reduce_key(b"k").await.unwrap();
        downlink.reduce_value(b"1").await.unwrap();
        downlink.reduce_value(b"2").await.unwrap();
        downlink.end_of_input().await.unwrap();
        downlink.close().await.unwrap();

        let messages = collect(worker).await;
        assert_eq!(
            messages[0],
            DownwardMessage::RunReduce {
                partition: 0,
                piped_output: true
            }
        );
        assert_eq!(messages.len(), 5);
    }

    #[tokio::test]
    async fn test_abort_is_allowed_anywhere_and_blocks_items() {
        let (host, worker) = tokio::io::duplex(1024);
        let mut downlink = BinaryDownlink::new(host);

        downlink.run_map(b"", 1, true).await.unwrap();
        downlink.abort().await.unwrap();
        downlink.abort().await.unwrap();
        assert!(downlink.map_item(b"k", b"v").await.is_err());
        downlink.close().await.unwrap();
        downlink.close().await.unwrap();

        let messages = collect(worker).await;
        assert_eq!(messages.last(), Some(&DownwardMessage::Abort));
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_command_log_receives_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downlink.data");
        let file = tokio::fs::File::create(&path).await.unwrap();

        let (host, worker) = tokio::io::duplex(1024);
        let mut downlink = BinaryDownlink::new(host).with_command_log(file);
        downlink.start().await.unwrap();
        downlink.run_map(b"s", 0, false).await.unwrap();
        downlink.end_of_input().await.unwrap();
        downlink.close().await.unwrap();

        let wire = {
            let mut worker = worker;
            let mut bytes = Vec::new();
            worker.read_to_end(&mut bytes).await.unwrap();
            bytes
        };
        let logged = std::fs::read(&path).unwrap();
        assert_eq!(logged, wire);
        assert_eq!(downlink.commands_sent(), 3);
    }
}
