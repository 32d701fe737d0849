use super::{decode_datum, schema_from_conf, AvroIoMode};
use crate::config::{keys, JobConf};
use crate::error::{common, Result};
use crate::task::RecordWriter;
use apache_avro::types::Value;
use apache_avro::Schema;
use std::sync::{Arc, Mutex};

/// What an output slot receives.
#[derive(Debug, Clone, PartialEq)]
pub enum AvroDatum {
    Record(Value),
    /// Placeholder value of key-only output.
    NullMarker,
}

/// Destination of decoded worker output.
pub trait AvroRecordWriter: Send {
    fn write(&mut self, key: Option<AvroDatum>, value: Option<AvroDatum>) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Decodes the worker's byte output back into Avro records.
///
/// Key-only output reaches the inner writer as `(record, NullMarker)`,
/// value-only output as `(None, record)`.
pub struct AvroBridgeWriter {
    mode: AvroIoMode,
    key_schema: Option<Schema>,
    value_schema: Option<Schema>,
    inner: Box<dyn AvroRecordWriter>,
}

impl AvroBridgeWriter {
    pub fn new(
        mode: AvroIoMode,
        key_schema: Option<Schema>,
        value_schema: Option<Schema>,
        inner: Box<dyn AvroRecordWriter>,
    ) -> Result<Self> {
        if mode.has_key() && key_schema.is_none() {
            return Err(common::missing_config(keys::AVRO_KEY_OUTPUT_SCHEMA));
        }
        if mode.has_value() && value_schema.is_none() {
            return Err(common::missing_config(keys::AVRO_VALUE_OUTPUT_SCHEMA));
        }
        Ok(Self {
            mode,
            key_schema,
            value_schema,
            inner,
        })
    }

    /// Build from the output mode and schemas in `conf`.
    pub fn from_job_conf(conf: &JobConf, inner: Box<dyn AvroRecordWriter>) -> Result<Self> {
        let mode = AvroIoMode::from_conf(conf, keys::AVRO_OUTPUT)?
            .ok_or_else(|| common::missing_config(keys::AVRO_OUTPUT))?;
        let key_schema = schema_from_conf(conf, keys::AVRO_KEY_OUTPUT_SCHEMA, mode.has_key())?;
        let value_schema =
            schema_from_conf(conf, keys::AVRO_VALUE_OUTPUT_SCHEMA, mode.has_value())?;
        Self::new(mode, key_schema, value_schema, inner)
    }

    fn decode(schema: Option<&Schema>, bytes: &[u8]) -> Result<Option<Value>> {
        schema.map(|schema| decode_datum(schema, bytes)).transpose()
    }
}

impl RecordWriter for AvroBridgeWriter {
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = Self::decode(self.key_schema.as_ref(), key)?;
        let value = Self::decode(self.value_schema.as_ref(), value)?;

        let (key, value) = match self.mode {
            AvroIoMode::Key => (key.map(AvroDatum::Record), Some(AvroDatum::NullMarker)),
            AvroIoMode::Value => (None, value.map(AvroDatum::Record)),
            AvroIoMode::KeyValue => (key.map(AvroDatum::Record), value.map(AvroDatum::Record)),
        };
        self.inner.write(key, value)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

type Written = Vec<(Option<AvroDatum>, Option<AvroDatum>)>;

/// Collects decoded output in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryAvroWriter {
    written: Arc<Mutex<Written>>,
}

impl MemoryAvroWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Written {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl AvroRecordWriter for MemoryAvroWriter {
    fn write(&mut self, key: Option<AvroDatum>, value: Option<AvroDatum>) -> Result<()> {
        if let Ok(mut written) = self.written.lock() {
            written.push((key, value));
        }
        Ok(())
    }
}
