//! The bridge protocol: command codes, message model and both channel ends.

pub mod digest;
pub mod downlink;
pub mod uplink;
pub mod wire;

use crate::error::{ErrorCode, PipesError, Result};
use std::borrow::Cow;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use downlink::{BinaryDownlink, DownwardProtocol};
pub use uplink::{UplinkReader, UpwardProtocol};

/// Version announced in the START command.
pub const PROTOCOL_VERSION: i32 = 0;

/// Command codes in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Start,
    SetJobConf,
    SetInputTypes,
    RunMap,
    MapItem,
    RunReduce,
    ReduceKey,
    ReduceValue,
    Close,
    Abort,
    AuthenticationReq,
    Output,
    PartitionedOutput,
    Status,
    Progress,
    Done,
    RegisterCounter,
    IncrementCounter,
    AuthenticationResp,
}

impl MessageType {
    pub fn code(self) -> i32 {
        match self {
            Self::Start => 0,
            Self::SetJobConf => 1,
            Self::SetInputTypes => 2,
            Self::RunMap => 3,
            Self::MapItem => 4,
            Self::RunReduce => 5,
            Self::ReduceKey => 6,
            Self::ReduceValue => 7,
            Self::Close => 8,
            Self::Abort => 9,
            Self::AuthenticationReq => 10,
            Self::Output => 50,
            Self::PartitionedOutput => 51,
            Self::Status => 52,
            Self::Progress => 53,
            Self::Done => 54,
            Self::RegisterCounter => 55,
            Self::IncrementCounter => 56,
            Self::AuthenticationResp => 57,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let message = match code {
            0 => Self::Start,
            1 => Self::SetJobConf,
            2 => Self::SetInputTypes,
            3 => Self::RunMap,
            4 => Self::MapItem,
            5 => Self::RunReduce,
            6 => Self::ReduceKey,
            7 => Self::ReduceValue,
            8 => Self::Close,
            9 => Self::Abort,
            10 => Self::AuthenticationReq,
            50 => Self::Output,
            51 => Self::PartitionedOutput,
            52 => Self::Status,
            53 => Self::Progress,
            54 => Self::Done,
            55 => Self::RegisterCounter,
            56 => Self::IncrementCounter,
            57 => Self::AuthenticationResp,
            _ => return None,
        };
        Some(message)
    }

    /// Host-to-worker commands have codes below 50.
    pub fn is_downward(self) -> bool {
        self.code() < 50
    }
}

/// Host-to-worker command.
#[derive(Debug, Clone, PartialEq)]
pub enum DownwardMessage<'a> {
    Authenticate {
        digest: Cow<'a, str>,
        challenge: Cow<'a, str>,
    },
    Start {
        protocol_version: i32,
    },
    SetJobConf(Vec<(Cow<'a, str>, Cow<'a, str>)>),
    SetInputTypes {
        key_class: Cow<'a, str>,
        value_class: Cow<'a, str>,
    },
    RunMap {
        split: Cow<'a, [u8]>,
        num_reduces: i32,
        piped_input: bool,
    },
    MapItem {
        key: Cow<'a, [u8]>,
        value: Cow<'a, [u8]>,
    },
    RunReduce {
        partition: i32,
        piped_output: bool,
    },
    ReduceKey(Cow<'a, [u8]>),
    ReduceValue(Cow<'a, [u8]>),
    EndOfInput,
    Abort,
}

impl DownwardMessage<'_> {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Authenticate { .. } => MessageType::AuthenticationReq,
            Self::Start { .. } => MessageType::Start,
            Self::SetJobConf(_) => MessageType::SetJobConf,
            Self::SetInputTypes { .. } => MessageType::SetInputTypes,
            Self::RunMap { .. } => MessageType::RunMap,
            Self::MapItem { .. } => MessageType::MapItem,
            Self::RunReduce { .. } => MessageType::RunReduce,
            Self::ReduceKey(_) => MessageType::ReduceKey,
            Self::ReduceValue(_) => MessageType::ReduceValue,
            Self::EndOfInput => MessageType::Close,
            Self::Abort => MessageType::Abort,
        }
    }

    /// Append the framed command to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::write_vint(buf, self.message_type().code());
        match self {
            Self::Authenticate { digest, challenge } => {
                wire::write_string(buf, digest)?;
                wire::write_string(buf, challenge)?;
            }
            Self::Start { protocol_version } => wire::write_vint(buf, *protocol_version),
            Self::SetJobConf(pairs) => {
                wire::write_vint(buf, (pairs.len() * 2) as i32);
                for (key, value) in pairs {
                    wire::write_string(buf, key)?;
                    wire::write_string(buf, value)?;
                }
            }
            Self::SetInputTypes {
                key_class,
                value_class,
            } => {
                wire::write_string(buf, key_class)?;
                wire::write_string(buf, value_class)?;
            }
            Self::RunMap {
                split,
                num_reduces,
                piped_input,
            } => {
                wire::write_bytes(buf, split)?;
                wire::write_vint(buf, *num_reduces);
                wire::write_bool(buf, *piped_input);
            }
            Self::MapItem { key, value } => {
                wire::write_bytes(buf, key)?;
                wire::write_bytes(buf, value)?;
            }
            Self::RunReduce {
                partition,
                piped_output,
            } => {
                wire::write_vint(buf, *partition);
                wire::write_bool(buf, *piped_output);
            }
            Self::ReduceKey(key) => wire::write_bytes(buf, key)?,
            Self::ReduceValue(value) => wire::write_bytes(buf, value)?,
            Self::EndOfInput | Self::Abort => {}
        }
        Ok(())
    }

    pub fn into_owned(self) -> DownwardMessage<'static> {
        fn s(c: Cow<'_, str>) -> Cow<'static, str> {
            Cow::Owned(c.into_owned())
        }
        fn b(c: Cow<'_, [u8]>) -> Cow<'static, [u8]> {
            Cow::Owned(c.into_owned())
        }

        match self {
            Self::Authenticate { digest, challenge } => DownwardMessage::Authenticate {
                digest: s(digest),
                challenge: s(challenge),
            },
            Self::Start { protocol_version } => DownwardMessage::Start { protocol_version },
            Self::SetJobConf(pairs) => {
                DownwardMessage::SetJobConf(pairs.into_iter().map(|(k, v)| (s(k), s(v))).collect())
            }
            Self::SetInputTypes {
                key_class,
                value_class,
            } => DownwardMessage::SetInputTypes {
                key_class: s(key_class),
                value_class: s(value_class),
            },
            Self::RunMap {
                split,
                num_reduces,
                piped_input,
            } => DownwardMessage::RunMap {
                split: b(split),
                num_reduces,
                piped_input,
            },
            Self::MapItem { key, value } => DownwardMessage::MapItem {
                key: b(key),
                value: b(value),
            },
            Self::RunReduce {
                partition,
                piped_output,
            } => DownwardMessage::RunReduce {
                partition,
                piped_output,
            },
            Self::ReduceKey(key) => DownwardMessage::ReduceKey(b(key)),
            Self::ReduceValue(value) => DownwardMessage::ReduceValue(b(value)),
            Self::EndOfInput => DownwardMessage::EndOfInput,
            Self::Abort => DownwardMessage::Abort,
        }
    }
}

impl DownwardMessage<'static> {
    /// Read one command; `Ok(None)` on a clean end of stream.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Self>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let Some(message_type) = read_message_type(reader).await? else {
            return Ok(None);
        };

        let message = match message_type {
            MessageType::AuthenticationReq => Self::Authenticate {
                digest: wire::read_string(reader).await?.into(),
                challenge: wire::read_string(reader).await?.into(),
            },
            MessageType::Start => Self::Start {
                protocol_version: wire::read_vint(reader).await?,
            },
            MessageType::SetJobConf => {
                let items = wire::read_vint(reader).await?;
                if items < 0 || items % 2 != 0 {
                    return Err(malformed(format!(
                        "SET_JOB_CONF carries {} strings, expected an even count",
                        items
                    )));
                }
                let mut pairs = Vec::with_capacity((items / 2) as usize);
                for _ in 0..items / 2 {
                    let key = wire::read_string(reader).await?;
                    let value = wire::read_string(reader).await?;
                    pairs.push((key.into(), value.into()));
                }
                Self::SetJobConf(pairs)
            }
            MessageType::SetInputTypes => Self::SetInputTypes {
                key_class: wire::read_string(reader).await?.into(),
                value_class: wire::read_string(reader).await?.into(),
            },
            MessageType::RunMap => Self::RunMap {
                split: wire::read_bytes(reader).await?.into(),
                num_reduces: wire::read_vint(reader).await?,
                piped_input: wire::read_bool(reader).await?,
            },
            MessageType::MapItem => Self::MapItem {
                key: wire::read_bytes(reader).await?.into(),
                value: wire::read_bytes(reader).await?.into(),
            },
            MessageType::RunReduce => Self::RunReduce {
                partition: wire::read_vint(reader).await?,
                piped_output: wire::read_bool(reader).await?,
            },
            MessageType::ReduceKey => Self::ReduceKey(wire::read_bytes(reader).await?.into()),
            MessageType::ReduceValue => Self::ReduceValue(wire::read_bytes(reader).await?.into()),
            MessageType::Close => Self::EndOfInput,
            MessageType::Abort => Self::Abort,
            upward => {
                return Err(unknown_command(
                    upward.code(),
                    "upward command on the downward channel",
                ))
            }
        };
        Ok(Some(message))
    }
}

/// Worker-to-host message.
#[derive(Debug, Clone, PartialEq)]
pub enum UpwardMessage<'a> {
    Output {
        key: Cow<'a, [u8]>,
        value: Cow<'a, [u8]>,
    },
    PartitionedOutput {
        partition: u32,
        key: Cow<'a, [u8]>,
        value: Cow<'a, [u8]>,
    },
    Status(Cow<'a, str>),
    Progress(f32),
    Done,
    RegisterCounter {
        id: u32,
        group: Cow<'a, str>,
        name: Cow<'a, str>,
    },
    IncrementCounter {
        id: u32,
        amount: i64,
    },
    Authenticate(Cow<'a, str>),
}

impl UpwardMessage<'_> {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Output { .. } => MessageType::Output,
            Self::PartitionedOutput { .. } => MessageType::PartitionedOutput,
            Self::Status(_) => MessageType::Status,
            Self::Progress(_) => MessageType::Progress,
            Self::Done => MessageType::Done,
            Self::RegisterCounter { .. } => MessageType::RegisterCounter,
            Self::IncrementCounter { .. } => MessageType::IncrementCounter,
            Self::Authenticate(_) => MessageType::AuthenticationResp,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        wire::write_vint(buf, self.message_type().code());
        match self {
            Self::Output { key, value } => {
                wire::write_bytes(buf, key)?;
                wire::write_bytes(buf, value)?;
            }
            Self::PartitionedOutput {
                partition,
                key,
                value,
            } => {
                wire::write_vint(buf, *partition as i32);
                wire::write_bytes(buf, key)?;
                wire::write_bytes(buf, value)?;
            }
            Self::Status(text) => wire::write_string(buf, text)?,
            Self::Progress(progress) => wire::write_float(buf, *progress),
            Self::Done => {}
            Self::RegisterCounter { id, group, name } => {
                wire::write_vint(buf, *id as i32);
                wire::write_string(buf, group)?;
                wire::write_string(buf, name)?;
            }
            Self::IncrementCounter { id, amount } => {
                wire::write_vint(buf, *id as i32);
                wire::write_vlong(buf, *amount);
            }
            Self::Authenticate(digest) => wire::write_string(buf, digest)?,
        }
        Ok(())
    }
}

impl UpwardMessage<'static> {
    /// Read one message; `Ok(None)` on a clean end of stream.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Self>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let Some(message_type) = read_message_type(reader).await? else {
            return Ok(None);
        };

        let message = match message_type {
            MessageType::Output => Self::Output {
                key: wire::read_bytes(reader).await?.into(),
                value: wire::read_bytes(reader).await?.into(),
            },
            MessageType::PartitionedOutput => Self::PartitionedOutput {
                partition: non_negative(wire::read_vint(reader).await?, "partition")?,
                key: wire::read_bytes(reader).await?.into(),
                value: wire::read_bytes(reader).await?.into(),
            },
            MessageType::Status => Self::Status(wire::read_string(reader).await?.into()),
            MessageType::Progress => Self::Progress(wire::read_float(reader).await?),
            MessageType::Done => Self::Done,
            MessageType::RegisterCounter => Self::RegisterCounter {
                id: non_negative(wire::read_vint(reader).await?, "counter id")?,
                group: wire::read_string(reader).await?.into(),
                name: wire::read_string(reader).await?.into(),
            },
            MessageType::IncrementCounter => Self::IncrementCounter {
                id: non_negative(wire::read_vint(reader).await?, "counter id")?,
                amount: wire::read_vlong(reader).await?,
            },
            MessageType::AuthenticationResp => {
                Self::Authenticate(wire::read_string(reader).await?.into())
            }
            downward => {
                return Err(unknown_command(
                    downward.code(),
                    "downward command on the upward channel",
                ))
            }
        };
        Ok(Some(message))
    }
}

async fn read_message_type<R>(reader: &mut R) -> Result<Option<MessageType>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Ok(None);
    }
    let code = wire::read_vlong_after(first[0] as i8, reader).await?;
    let code = i32::try_from(code).map_err(|_| unknown_command(-1, "code out of range"))?;
    MessageType::from_code(code)
        .map(Some)
        .ok_or_else(|| unknown_command(code, "unrecognised command code"))
}

fn unknown_command(code: i32, reason: &str) -> PipesError {
    PipesError::protocol_with_code(
        ErrorCode::PROTOCOL_UNKNOWN_COMMAND,
        format!("Command {}: {}", code, reason),
    )
}

fn malformed(message: String) -> PipesError {
    PipesError::protocol_with_code(ErrorCode::PROTOCOL_MALFORMED_MESSAGE, message)
}

fn non_negative(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed(format!("Negative {} {}", what, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table_is_stable() {
        assert_eq!(MessageType::Start.code(), 0);
        assert_eq!(MessageType::AuthenticationReq.code(), 10);
        assert_eq!(MessageType::Output.code(), 50);
        assert_eq!(MessageType::AuthenticationResp.code(), 57);

        for code in (0..=10).chain(50..=57) {
            let message = MessageType::from_code(code).unwrap();
            assert_eq!(message.code(), code);
            assert_eq!(message.is_downward(), code < 50);
        }
        assert_eq!(MessageType::from_code(11), None);
        assert_eq!(MessageType::from_code(58), None);
    }

    #[test]
    fn test_set_job_conf_frame() {
        let mut buf = Vec::new();
        DownwardMessage::SetJobConf(vec![("a".into(), "b".into())]).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 1, b'a', 1, b'b']);
    }

    #[test]
    fn test_end_of_input_is_close_on_the_wire() {
        let mut buf = Vec::new();
        DownwardMessage::EndOfInput.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![8]);
    }

    #[tokio::test]
    async fn test_upward_stream_decodes_in_order() {
        let mut buf = Vec::new();
        UpwardMessage::RegisterCounter {
            id: 0,
            group: "wordcount".into(),
            name: "words".into(),
        }
        .encode(&mut buf).unwrap();
        UpwardMessage::IncrementCounter { id: 0, amount: 500 }.encode(&mut buf).unwrap();
        UpwardMessage::PartitionedOutput {
            partition: 3,
            key: Cow::Borrowed(b"k"),
            value: Cow::Borrowed(b"v"),
        }
        .encode(&mut buf).unwrap();
        UpwardMessage::Done.encode(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let mut seen = Vec::new();
        while let Some(message) = UpwardMessage::read_from(&mut cursor).await.unwrap() {
            seen.push(message);
        }

        assert_eq!(seen.len(), 4);
        assert_eq!(
            seen[1],
            UpwardMessage::IncrementCounter { id: 0, amount: 500 }
        );
        assert!(matches!(
            seen[2],
            UpwardMessage::PartitionedOutput { partition: 3, .. }
        ));
        assert_eq!(seen[3], UpwardMessage::Done);
    }

    #[tokio::test]
    async fn test_unknown_upward_code() {
        let mut cursor = std::io::Cursor::new(vec![99u8]);
        let err = UpwardMessage::read_from(&mut cursor).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_UNKNOWN_COMMAND);
    }

    #[tokio::test]
    async fn test_downward_code_on_upward_channel_rejected() {
        let mut cursor = std::io::Cursor::new(vec![MessageType::MapItem.code() as u8]);
        let err = UpwardMessage::read_from(&mut cursor).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_negative_partition_rejected() {
        let mut buf = Vec::new();
        wire::write_vint(&mut buf, MessageType::PartitionedOutput.code());
        wire::write_vint(&mut buf, -2);
        let mut cursor = std::io::Cursor::new(buf);
        let err = UpwardMessage::read_from(&mut cursor).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_MALFORMED_MESSAGE);
    }

    #[tokio::test]
    async fn test_truncated_message_is_protocol_error() {
        let mut buf = Vec::new();
        UpwardMessage::Status("working".into()).encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        let mut cursor = std::io::Cursor::new(buf);
        let err = UpwardMessage::read_from(&mut cursor).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PROTOCOL_UNEXPECTED_EOF);
    }

    #[tokio::test]
    async fn test_downward_read_from() {
        let mut buf = Vec::new();
        DownwardMessage::RunMap {
            split: Cow::Borrowed(b"split-0"),
            num_reduces: 2,
            piped_input: true,
        }
        .encode(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let message = DownwardMessage::read_from(&mut cursor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            DownwardMessage::RunMap {
                split: Cow::Owned(b"split-0".to_vec()),
                num_reduces: 2,
                piped_input: true,
            }
        );
    }
}
