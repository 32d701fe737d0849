use super::{encode_datum, schema_json, AvroIoMode};
use crate::bridge::counters::Counter;
use crate::config::{keys, JobConf};
use crate::error::{ErrorCode, PipesError, Result};
use crate::task::{RecordReader, TaskContext, NULL_WRITABLE, TEXT};
use apache_avro::types::Value;
use apache_avro::Schema;
use std::sync::Arc;
use std::time::Instant;

/// An Avro value together with the schema it was written with.
#[derive(Debug, Clone)]
pub struct SchemaValue {
    pub schema: Arc<Schema>,
    pub value: Value,
}

impl SchemaValue {
    pub fn new(schema: Arc<Schema>, value: Value) -> Self {
        Self { schema, value }
    }
}

/// One input record; slots the source does not fill are `None`.
#[derive(Debug, Clone, Default)]
pub struct AvroRecord {
    pub key: Option<SchemaValue>,
    pub value: Option<SchemaValue>,
}

/// Where [`AvroBridgeReader`] pulls structured records from.
pub trait AvroRecordSource: Send {
    fn next_record(&mut self) -> Result<Option<AvroRecord>>;

    fn progress(&self) -> f32;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Records held in memory.
#[derive(Debug, Default)]
pub struct MemoryAvroSource {
    records: Vec<AvroRecord>,
    position: usize,
}

impl MemoryAvroSource {
    pub fn new(records: Vec<AvroRecord>) -> Self {
        Self {
            records,
            position: 0,
        }
    }

    /// Value-only records sharing one schema.
    pub fn values(schema: Schema, values: Vec<Value>) -> Self {
        let schema = Arc::new(schema);
        Self::new(
            values
                .into_iter()
                .map(|value| AvroRecord {
                    key: None,
                    value: Some(SchemaValue::new(Arc::clone(&schema), value)),
                })
                .collect(),
        )
    }
}

impl AvroRecordSource for MemoryAvroSource {
    fn next_record(&mut self) -> Result<Option<AvroRecord>> {
        let record = self.records.get(self.position).cloned();
        if record.is_some() {
            self.position += 1;
        }
        Ok(record)
    }

    fn progress(&self) -> f32 {
        if self.records.is_empty() {
            1.0
        } else {
            self.position as f32 / self.records.len() as f32
        }
    }
}

/// Records of an Avro object container file.
///
/// In `KV` mode each datum must be a record with `key` and `value` fields,
/// the layout Avro's key/value files use.
pub struct ContainerFileSource {
    inner: MemoryAvroSource,
}

impl ContainerFileSource {
    pub fn from_bytes(data: &[u8], mode: AvroIoMode) -> Result<Self> {
        let reader = apache_avro::Reader::new(data).map_err(|e| {
            PipesError::serialization_with_code(
                ErrorCode::SERIAL_DECODE,
                "Not an Avro container file",
            )
            .with_source(e)
        })?;
        let schema = reader.writer_schema().clone();
        let slots = SlotSchemas::for_mode(&schema, mode)?;

        let mut records = Vec::new();
        for datum in reader {
            let datum = datum.map_err(|e| {
                PipesError::serialization_with_code(ErrorCode::SERIAL_DECODE, "Corrupt Avro block")
                    .with_source(e)
            })?;
            records.push(slots.split(datum)?);
        }
        Ok(Self {
            inner: MemoryAvroSource::new(records),
        })
    }

    pub async fn open(path: &std::path::Path, mode: AvroIoMode) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Self::from_bytes(&data, mode)
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }
}

impl AvroRecordSource for ContainerFileSource {
    fn next_record(&mut self) -> Result<Option<AvroRecord>> {
        self.inner.next_record()
    }

    fn progress(&self) -> f32 {
        self.inner.progress()
    }
}

enum SlotSchemas {
    Key(Arc<Schema>),
    Value(Arc<Schema>),
    KeyValue(Arc<Schema>, Arc<Schema>),
}

impl SlotSchemas {
    fn for_mode(schema: &Schema, mode: AvroIoMode) -> Result<Self> {
        match mode {
            AvroIoMode::Key => Ok(SlotSchemas::Key(Arc::new(schema.clone()))),
            AvroIoMode::Value => Ok(SlotSchemas::Value(Arc::new(schema.clone()))),
            AvroIoMode::KeyValue => {
                let field_schema = |name: &str| match schema {
                    Schema::Record(record) => record
                        .fields
                        .iter()
                        .find(|field| field.name == name)
                        .map(|field| Arc::new(field.schema.clone())),
                    _ => None,
                };
                match (field_schema("key"), field_schema("value")) {
                    (Some(key), Some(value)) => Ok(SlotSchemas::KeyValue(key, value)),
                    _ => Err(PipesError::serialization_with_code(
                        ErrorCode::SERIAL_MODE_MISMATCH,
                        "KV input needs records with 'key' and 'value' fields",
                    )),
                }
            }
        }
    }

    fn split(&self, datum: Value) -> Result<AvroRecord> {
        match self {
            SlotSchemas::Key(schema) => Ok(AvroRecord {
                key: Some(SchemaValue::new(Arc::clone(schema), datum)),
                value: None,
            }),
            SlotSchemas::Value(schema) => Ok(AvroRecord {
                key: None,
                value: Some(SchemaValue::new(Arc::clone(schema), datum)),
            }),
            SlotSchemas::KeyValue(key_schema, value_schema) => {
                let Value::Record(fields) = datum else {
                    return Err(PipesError::serialization_with_code(
                        ErrorCode::SERIAL_MODE_MISMATCH,
                        "KV input datum is not a record",
                    ));
                };
                let mut key = None;
                let mut value = None;
                for (name, field) in fields {
                    match name.as_str() {
                        "key" => key = Some(SchemaValue::new(Arc::clone(key_schema), field)),
                        "value" => value = Some(SchemaValue::new(Arc::clone(value_schema), field)),
                        _ => {}
                    }
                }
                Ok(AvroRecord { key, value })
            }
        }
    }
}

struct ReaderCounters {
    records: Counter,
    read_time: Counter,
    serialization_time: Counter,
}

/// Record reader that hands Avro records to the worker as raw datums.
///
/// The first record is read during `initialize` to learn the schema of each
/// slot; the schemas and the mode are then published in the job
/// configuration for the worker to pick up.
pub struct AvroBridgeReader {
    source: Box<dyn AvroRecordSource>,
    mode: AvroIoMode,
    key_schema: Option<Arc<Schema>>,
    value_schema: Option<Arc<Schema>>,
    buffered: Option<AvroRecord>,
    key: Vec<u8>,
    value: Vec<u8>,
    counters: Option<ReaderCounters>,
}

impl AvroBridgeReader {
    pub fn new(source: Box<dyn AvroRecordSource>, mode: AvroIoMode) -> Self {
        Self {
            source,
            mode,
            key_schema: None,
            value_schema: None,
            buffered: None,
            key: Vec::new(),
            value: Vec::new(),
            counters: None,
        }
    }

    pub fn mode(&self) -> AvroIoMode {
        self.mode
    }

    fn learn_schemas(&mut self, record: &AvroRecord) -> Result<()> {
        if self.mode.has_key() {
            let slot = record.key.as_ref().ok_or_else(|| missing_slot(self.mode, "key"))?;
            self.key_schema = Some(Arc::clone(&slot.schema));
        }
        if self.mode.has_value() {
            let slot = record
                .value
                .as_ref()
                .ok_or_else(|| missing_slot(self.mode, "value"))?;
            self.value_schema = Some(Arc::clone(&slot.schema));
        }
        Ok(())
    }

    fn encode(&mut self, record: AvroRecord) -> Result<()> {
        encode_slot(self.key_schema.as_deref(), record.key, &mut self.key, self.mode, "key")?;
        encode_slot(
            self.value_schema.as_deref(),
            record.value,
            &mut self.value,
            self.mode,
            "value",
        )
    }
}

fn missing_slot(mode: AvroIoMode, slot: &str) -> PipesError {
    PipesError::serialization_with_code(
        ErrorCode::SERIAL_MODE_MISMATCH,
        format!("Avro input mode {} needs a {} in every record", mode, slot),
    )
}

fn encode_slot(
    schema: Option<&Schema>,
    slot: Option<SchemaValue>,
    buf: &mut Vec<u8>,
    mode: AvroIoMode,
    name: &str,
) -> Result<()> {
    match schema {
        Some(schema) => {
            let slot = slot.ok_or_else(|| missing_slot(mode, name))?;
            encode_datum(schema, slot.value, buf)
        }
        None => {
            buf.clear();
            Ok(())
        }
    }
}

impl RecordReader for AvroBridgeReader {
    fn initialize(&mut self, conf: &mut JobConf, ctx: &dyn TaskContext) -> Result<()> {
        conf.set(keys::AVRO_INPUT, self.mode.as_str());
        self.counters = Some(ReaderCounters {
            records: ctx.counter(super::COUNTER_GROUP, super::COUNTER_RECORDS),
            read_time: ctx.counter(super::COUNTER_GROUP, super::COUNTER_READ_TIME),
            serialization_time: ctx.counter(super::COUNTER_GROUP, super::COUNTER_SERIALIZATION_TIME),
        });

        let Some(first) = self.source.next_record()? else {
            tracing::debug!("Avro input is empty, no schema published");
            return Ok(());
        };
        self.learn_schemas(&first)?;
        if let Some(schema) = &self.key_schema {
            conf.set(keys::AVRO_KEY_INPUT_SCHEMA, schema_json(schema)?);
        }
        if let Some(schema) = &self.value_schema {
            conf.set(keys::AVRO_VALUE_INPUT_SCHEMA, schema_json(schema)?);
        }
        self.buffered = Some(first);
        Ok(())
    }

    fn next_key_value(&mut self) -> Result<Option<(&[u8], &[u8])>> {
        let started = Instant::now();
        let record = match self.buffered.take() {
            Some(record) => record,
            None => match self.source.next_record()? {
                Some(record) => record,
                None => return Ok(None),
            },
        };
        let read_time = started.elapsed();

        let started = Instant::now();
        self.encode(record)?;
        let serialization_time = started.elapsed();

        if let Some(counters) = &self.counters {
            counters.records.increment(1);
            counters.read_time.increment(read_time.as_millis() as i64);
            counters
                .serialization_time
                .increment(serialization_time.as_millis() as i64);
        }
        Ok(Some((&self.key[..], &self.value[..])))
    }

    fn key_class(&self) -> &str {
        if self.mode.has_key() {
            TEXT
        } else {
            NULL_WRITABLE
        }
    }

    fn value_class(&self) -> &str {
        if self.mode.has_value() {
            TEXT
        } else {
            NULL_WRITABLE
        }
    }

    fn progress(&self) -> f32 {
        self.source.progress()
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}
