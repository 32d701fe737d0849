use crate::config::keys;
use crate::error::{common, ErrorCode, PipesError, Result};
use crate::protocol::digest;
use crate::protocol::{DownwardMessage, MessageType, UpwardMessage};
use crate::subprocess::{MockWorkerLauncher, WorkerCommand};
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

/// Every command the worker received, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<DownwardMessage<'static>>>>);

impl Transcript {
    fn push(&self, message: DownwardMessage<'static>) {
        if let Ok(mut messages) = self.0.lock() {
            messages.push(message);
        }
    }

    pub fn messages(&self) -> Vec<DownwardMessage<'static>> {
        self.0.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn message_types(&self) -> Vec<MessageType> {
        self.messages().iter().map(|m| m.message_type()).collect()
    }

    /// The SET_JOB_CONF payload, if one arrived.
    pub fn job_conf(&self) -> Option<Vec<(String, String)>> {
        self.messages().into_iter().find_map(|m| match m {
            DownwardMessage::SetJobConf(pairs) => Some(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            ),
            _ => None,
        })
    }
}

/// Minimal worker used by tests and the `echo-worker` command.
///
/// It answers the handshake, optionally echoes every input record back as
/// OUTPUT, plays its scripted messages once input ends and then sends DONE.
#[derive(Debug, Clone)]
pub struct FakeWorker {
    echo: bool,
    script: Vec<UpwardMessage<'static>>,
    send_done: bool,
    answer_auth: bool,
    secret: Option<Vec<u8>>,
    exit_before_connect: Option<i32>,
    transcript: Transcript,
}

impl Default for FakeWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWorker {
    pub fn new() -> Self {
        Self {
            echo: false,
            script: Vec::new(),
            send_done: true,
            answer_auth: true,
            secret: None,
            exit_before_connect: None,
            transcript: Transcript::default(),
        }
    }

    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Queue a message sent after the end of input, before DONE.
    pub fn then_send(mut self, message: UpwardMessage<'static>) -> Self {
        self.script.push(message);
        self
    }

    pub fn without_done(mut self) -> Self {
        self.send_done = false;
        self
    }

    /// Never answer the authentication challenge.
    pub fn silent(mut self) -> Self {
        self.answer_auth = false;
        self
    }

    /// Answer the challenge with this secret instead of the shared one.
    pub fn with_secret(mut self, secret: &[u8]) -> Self {
        self.secret = Some(secret.to_vec());
        self
    }

    pub fn exit_before_connect(mut self, code: i32) -> Self {
        self.exit_before_connect = Some(code);
        self
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }

    /// A launcher that runs this worker inside the test runtime.
    pub fn into_launcher(self) -> MockWorkerLauncher {
        MockWorkerLauncher::new(move |command: WorkerCommand| {
            let worker = self.clone();
            async move {
                match worker.serve(|key| command.env.get(key).cloned()).await {
                    Ok(code) => code,
                    Err(e) => {
                        tracing::warn!("Fake worker failed: {}", e);
                        2
                    }
                }
            }
        })
    }

    /// Connect to the host found through `lookup` and serve one session.
    /// Returns the exit code the worker process should report.
    pub async fn serve<F>(&self, lookup: F) -> Result<i32>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(code) = self.exit_before_connect {
            return Ok(code);
        }

        let port = lookup(keys::ENV_COMMAND_PORT)
            .ok_or_else(|| common::missing_config(keys::ENV_COMMAND_PORT))?;
        let port: u16 = port
            .parse()
            .map_err(|_| common::invalid_config(keys::ENV_COMMAND_PORT, &port, "a TCP port"))?;
        let secret = match &self.secret {
            Some(secret) => secret.clone(),
            None => {
                let location = lookup(keys::ENV_SECRET_LOCATION)
                    .ok_or_else(|| common::missing_config(keys::ENV_SECRET_LOCATION))?;
                tokio::fs::read(&location).await.map_err(|e| {
                    PipesError::authentication_with_code(
                        ErrorCode::AUTH_SECRET_UNAVAILABLE,
                        format!("Cannot read secret from {}", location),
                    )
                    .with_source(e)
                })?
            }
        };

        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = Sender::new(write_half);

        let mut current_key: Vec<u8> = Vec::new();
        let mut finished = false;

        while let Some(message) = DownwardMessage::read_from(&mut reader).await? {
            self.transcript.push(message.clone());
            match message {
                DownwardMessage::Authenticate { digest, challenge } => {
                    if !self.answer_auth {
                        continue;
                    }
                    let response = if self.secret.is_some() {
                        digest::create_digest(&secret, &digest)?
                    } else {
                        digest::answer_challenge(&secret, &digest, &challenge)?
                    };
                    writer.send(UpwardMessage::Authenticate(response.into())).await?;
                    writer.flush().await?;
                }
                DownwardMessage::RunMap {
                    piped_input: false, ..
                } => {
                    self.finish(&mut writer, &mut finished).await?;
                }
                DownwardMessage::MapItem { key, value } if self.echo => {
                    writer.send(UpwardMessage::Output { key, value }).await?;
                }
                DownwardMessage::ReduceKey(key) => current_key = key.into_owned(),
                DownwardMessage::ReduceValue(value) if self.echo => {
                    writer
                        .send(UpwardMessage::Output {
                            key: Cow::Owned(current_key.clone()),
                            value,
                        })
                        .await?;
                }
                DownwardMessage::EndOfInput => {
                    self.finish(&mut writer, &mut finished).await?;
                }
                DownwardMessage::Abort => {
                    writer.flush().await?;
                    return Ok(1);
                }
                _ => {}
            }
        }
        Ok(0)
    }

    async fn finish<W>(&self, writer: &mut Sender<W>, finished: &mut bool) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if *finished {
            return Ok(());
        }
        *finished = true;
        for message in &self.script {
            writer.send(message.clone()).await?;
        }
        if self.send_done {
            writer.send(UpwardMessage::Done).await?;
        }
        writer.flush().await
    }
}

struct Sender<W: AsyncWrite + Unpin> {
    writer: BufWriter<W>,
    frame: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> Sender<W> {
    fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            frame: Vec::with_capacity(128),
        }
    }

    async fn send(&mut self, message: UpwardMessage<'_>) -> Result<()> {
        self.frame.clear();
        message.encode(&mut self.frame)?;
        self.writer.write_all(&self.frame).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
