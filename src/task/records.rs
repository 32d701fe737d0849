use crate::bridge::partition::{Partitioner, PipesPartitioner};
use crate::config::JobConf;
use crate::error::{ErrorCode, PipesError, Result};
use crate::task::TaskContext;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const NULL_WRITABLE: &str = "org.apache.hadoop.io.NullWritable";
pub const TEXT: &str = "org.apache.hadoop.io.Text";
pub const LONG_WRITABLE: &str = "org.apache.hadoop.io.LongWritable";
pub const FLOAT_WRITABLE: &str = "org.apache.hadoop.io.FloatWritable";

/// Progress value shared between the uplink and a record source.
#[derive(Debug, Clone, Default)]
pub struct ProgressCell {
    bits: Arc<AtomicU32>,
}

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, progress: f32) {
        self.bits.store(progress.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Source of serialized key/value records for one split.
pub trait RecordReader: Send {
    /// Runs before the worker is launched; may publish settings into `conf`.
    fn initialize(&mut self, _conf: &mut JobConf, _ctx: &dyn TaskContext) -> Result<()> {
        Ok(())
    }

    fn next_key_value(&mut self) -> Result<Option<(&[u8], &[u8])>>;

    /// Type name of the current key, as announced in SET_INPUT_TYPES.
    fn key_class(&self) -> &str;

    fn value_class(&self) -> &str;

    fn progress(&self) -> f32;

    /// Readers that only relay the worker's own progress return their cell.
    fn progress_cell(&self) -> Option<ProgressCell> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink for serialized key/value records.
pub trait RecordWriter: Send {
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory records, mostly for tests and local runs.
#[derive(Debug, Clone)]
pub struct VecRecordReader {
    records: Vec<(Vec<u8>, Vec<u8>)>,
    key_class: String,
    value_class: String,
    position: usize,
}

impl VecRecordReader {
    pub fn new(records: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self::with_classes(records, TEXT, TEXT)
    }

    pub fn with_classes(
        records: Vec<(Vec<u8>, Vec<u8>)>,
        key_class: impl Into<String>,
        value_class: impl Into<String>,
    ) -> Self {
        Self {
            records,
            key_class: key_class.into(),
            value_class: value_class.into(),
            position: 0,
        }
    }
}

impl RecordReader for VecRecordReader {
    fn next_key_value(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        let Some((key, value)) = self.records.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        Ok(Some((key.as_slice(), value.as_slice())))
    }

    fn key_class(&self) -> &str {
        &self.key_class
    }

    fn value_class(&self) -> &str {
        &self.value_class
    }

    fn progress(&self) -> f32 {
        if self.records.is_empty() {
            1.0
        } else {
            self.position as f32 / self.records.len() as f32
        }
    }
}

/// Line reader over a text buffer: key is the byte offset (`LongWritable`,
/// eight big-endian bytes), value the line without its terminator.
#[derive(Debug)]
pub struct TextLineReader {
    data: Vec<u8>,
    offset: usize,
    key: [u8; 8],
}

impl TextLineReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            offset: 0,
            key: [0; 8],
        }
    }
}

impl RecordReader for TextLineReader {
    fn next_key_value(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }

        let start = self.offset;
        let rest = &self.data[start..];
        let (line_len, consumed) = match rest.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos, pos + 1),
            None => (rest.len(), rest.len()),
        };
        let line_len = if line_len > 0 && rest[line_len - 1] == b'\r' {
            line_len - 1
        } else {
            line_len
        };

        self.offset += consumed;
        self.key = (start as i64).to_be_bytes();
        Ok(Some((&self.key[..], &self.data[start..start + line_len])))
    }

    fn key_class(&self) -> &str {
        LONG_WRITABLE
    }

    fn value_class(&self) -> &str {
        TEXT
    }

    fn progress(&self) -> f32 {
        if self.data.is_empty() {
            1.0
        } else {
            self.offset as f32 / self.data.len() as f32
        }
    }
}

/// Stand-in reader used when the worker reads its own input: it produces no
/// records and reports whatever progress the worker sends up.
#[derive(Debug, Clone, Default)]
pub struct PipedProgressReader {
    progress: ProgressCell,
}

impl PipedProgressReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordReader for PipedProgressReader {
    fn next_key_value(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        Ok(None)
    }

    fn key_class(&self) -> &str {
        FLOAT_WRITABLE
    }

    fn value_class(&self) -> &str {
        NULL_WRITABLE
    }

    fn progress(&self) -> f32 {
        self.progress.get()
    }

    fn progress_cell(&self) -> Option<ProgressCell> {
        Some(self.progress.clone())
    }
}

type RecordList = Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>;

/// Collects records in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordWriter {
    records: RecordList,
    closed: Arc<AtomicBool>,
}

impl MemoryRecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl RecordWriter for MemoryRecordWriter {
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Map-side output collector: routes every record through the partitioner
/// into one sink per reduce partition.
pub struct PartitionedCollector {
    partitioner: PipesPartitioner,
    sinks: Vec<Box<dyn RecordWriter>>,
}

impl PartitionedCollector {
    pub fn new(partitioner: PipesPartitioner, sinks: Vec<Box<dyn RecordWriter>>) -> Result<Self> {
        if sinks.is_empty() {
            return Err(PipesError::config("A partitioned collector needs at least one sink"));
        }
        Ok(Self { partitioner, sinks })
    }

    pub fn num_partitions(&self) -> u32 {
        self.sinks.len() as u32
    }
}

impl RecordWriter for PartitionedCollector {
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let n = self.num_partitions();
        let partition = self.partitioner.get_partition(key, value, n);
        let sink = self.sinks.get_mut(partition as usize).ok_or_else(|| {
            PipesError::protocol_with_code(
                ErrorCode::PROTOCOL_MALFORMED_MESSAGE,
                format!("Illegal partition {} (job has {})", partition, n),
            )
        })?;
        sink.write(key, value)
    }

    fn close(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.close()?;
        }
        Ok(())
    }
}
