//! Input splits the host never interprets.
//!
//! A producer writes a side file of [`OpaqueSplit`]s; the host reads it back
//! and hands each split to the worker untouched inside RUN_MAP.

use crate::config::{keys, JobConf};
use crate::error::{common, ErrorCode, PipesError, Result};
use crate::protocol::wire::{write_bytes, SliceReader};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A split as an uninterpreted `(code, payload)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpaqueSplit {
    pub code: Vec<u8>,
    pub payload: Vec<u8>,
}

impl OpaqueSplit {
    pub fn new(code: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code: code.into(),
            payload: payload.into(),
        }
    }

    /// Split length as reported to the scheduler.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        write_bytes(buf, &self.code)?;
        write_bytes(buf, &self.payload)
    }

    /// The bytes sent to the worker in RUN_MAP.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.code.len() + self.payload.len() + 10);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    fn read_from(reader: &mut SliceReader<'_>) -> Result<Self> {
        let code = reader.read_bytes()?.to_vec();
        let payload = reader.read_bytes()?.to_vec();
        Ok(Self { code, payload })
    }
}

/// Encode `splits` as a side file body.
pub fn write_splits(splits: &[OpaqueSplit]) -> Result<Vec<u8>> {
    let count = i32::try_from(splits.len()).map_err(|_| {
        PipesError::split_with_code(
            ErrorCode::SPLIT_GENERIC,
            format!("Cannot frame {} splits in one file", splits.len()),
            None,
        )
    })?;

    let mut buf = Vec::new();
    buf.extend_from_slice(&count.to_be_bytes());
    for split in splits {
        split.write_to(&mut buf)?;
    }
    Ok(buf)
}

/// Decode a side file body.
pub fn read_splits(data: &[u8]) -> Result<Vec<OpaqueSplit>> {
    let mut reader = SliceReader::new(data);
    let count = reader.read_i32_be().map_err(corrupted)?;
    if count < 0 {
        return Err(PipesError::split_with_code(
            ErrorCode::SPLIT_CORRUPTED,
            format!("Split count {} is negative", count),
            None,
        ));
    }

    let mut splits = Vec::with_capacity((count as usize).min(1024));
    for _ in 0..count {
        splits.push(OpaqueSplit::read_from(&mut reader).map_err(corrupted)?);
    }
    if !reader.is_empty() {
        tracing::warn!(
            "Ignoring {} trailing bytes after {} splits",
            data.len() - reader.position(),
            count
        );
    }
    Ok(splits)
}

fn corrupted(err: PipesError) -> PipesError {
    PipesError::split_with_code(ErrorCode::SPLIT_CORRUPTED, "Split data is truncated", None)
        .with_source(err)
}

pub async fn write_split_file(path: &Path, splits: &[OpaqueSplit]) -> Result<()> {
    let data = write_splits(splits)?;
    tokio::fs::write(path, data).await?;
    tracing::debug!("Wrote {} splits to {}", splits.len(), path.display());
    Ok(())
}

pub async fn read_split_file(path: &Path) -> Result<Vec<OpaqueSplit>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(common::split_file_not_found(path))
        }
        Err(e) => return Err(e.into()),
    };
    read_splits(&data).map_err(|e| e.with_context(path.display()))
}

/// Where the external split file lives, given its configured URI.
pub fn split_file_path(uri: &str) -> Result<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(PipesError::config_with_code(
            ErrorCode::CONFIG_UNSUPPORTED_SCHEME,
            format!("Cannot read splits from a '{}' location: {}", scheme, uri),
            Some(keys::EXTERNAL_SPLITS_URI.to_string()),
        ));
    }
    Ok(PathBuf::from(uri))
}

/// Something that can enumerate the splits of a job.
#[async_trait]
pub trait SplitSource: Send + Sync {
    async fn get_splits(&self, conf: &JobConf) -> Result<Vec<OpaqueSplit>>;
}

/// A fixed list of splits.
#[derive(Debug, Clone, Default)]
pub struct StaticSplitSource {
    splits: Vec<OpaqueSplit>,
}

impl StaticSplitSource {
    pub fn new(splits: Vec<OpaqueSplit>) -> Self {
        Self { splits }
    }
}

#[async_trait]
impl SplitSource for StaticSplitSource {
    async fn get_splits(&self, _conf: &JobConf) -> Result<Vec<OpaqueSplit>> {
        Ok(self.splits.clone())
    }
}

/// Split source of a pipes job: the external side file when enabled,
/// the wrapped source otherwise.
pub struct PipesInputFormat {
    fallback: Box<dyn SplitSource>,
}

impl PipesInputFormat {
    pub fn new(fallback: Box<dyn SplitSource>) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl SplitSource for PipesInputFormat {
    async fn get_splits(&self, conf: &JobConf) -> Result<Vec<OpaqueSplit>> {
        if !conf.get_bool(keys::EXTERNAL_SPLITS_ENABLED, false) {
            return self.fallback.get_splits(conf).await;
        }

        let uri = conf
            .get(keys::EXTERNAL_SPLITS_URI)
            .ok_or_else(|| common::missing_config(keys::EXTERNAL_SPLITS_URI))?;
        let path = split_file_path(uri)?;
        let splits = read_split_file(&path).await?;
        tracing::info!("Read {} external splits from {}", splits.len(), path.display());
        Ok(splits)
    }
}
