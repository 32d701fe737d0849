//! Avro bridging: records travel to and from the worker as raw Avro datums
//! inside opaque byte buffers, with their schemas published in the job
//! configuration.

pub mod reader;
pub mod writer;

pub use reader::{
    AvroBridgeReader, AvroRecord, AvroRecordSource, ContainerFileSource, MemoryAvroSource,
    SchemaValue,
};
pub use writer::{AvroBridgeWriter, AvroDatum, AvroRecordWriter, MemoryAvroWriter};

use crate::config::{keys, JobConf};
use crate::error::{common, ErrorCode, PipesError, Result};
use apache_avro::types::Value;
use apache_avro::Schema;
use std::fmt;
use std::str::FromStr;

/// Counter group updated by [`AvroBridgeReader`].
pub const COUNTER_GROUP: &str = "AvroBridgeReader";
pub const COUNTER_RECORDS: &str = "Number of records";
pub const COUNTER_READ_TIME: &str = "Read time (ms)";
pub const COUNTER_SERIALIZATION_TIME: &str = "Serialization time (ms)";

/// Which slots of a record carry Avro data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvroIoMode {
    Key,
    Value,
    KeyValue,
}

impl AvroIoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvroIoMode::Key => "K",
            AvroIoMode::Value => "V",
            AvroIoMode::KeyValue => "KV",
        }
    }

    pub fn has_key(&self) -> bool {
        matches!(self, AvroIoMode::Key | AvroIoMode::KeyValue)
    }

    pub fn has_value(&self) -> bool {
        matches!(self, AvroIoMode::Value | AvroIoMode::KeyValue)
    }

    /// Read the mode stored under `key`, if any.
    pub fn from_conf(conf: &JobConf, key: &str) -> Result<Option<Self>> {
        match conf.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| common::invalid_config(key, raw, "K, V or KV")),
        }
    }
}

impl FromStr for AvroIoMode {
    type Err = PipesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "K" => Ok(AvroIoMode::Key),
            "V" => Ok(AvroIoMode::Value),
            "KV" => Ok(AvroIoMode::KeyValue),
            other => Err(PipesError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("Unknown Avro mode '{}'", other),
                None,
            )),
        }
    }
}

impl fmt::Display for AvroIoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_schema(json: &str) -> Result<Schema> {
    Schema::parse_str(json).map_err(|e| {
        PipesError::serialization_with_code(ErrorCode::SERIAL_SCHEMA_PARSE, "Invalid Avro schema")
            .with_source(e)
    })
}

/// Schema stored under `key`; required when `needed`.
pub(crate) fn schema_from_conf(conf: &JobConf, key: &str, needed: bool) -> Result<Option<Schema>> {
    match conf.get(key) {
        Some(json) if needed => parse_schema(json).map(Some),
        None if needed => Err(common::missing_config(key)),
        _ => Ok(None),
    }
}

pub fn schema_json(schema: &Schema) -> Result<String> {
    serde_json::to_string(schema).map_err(|e| {
        PipesError::serialization_with_code(ErrorCode::SERIAL_ENCODE, "Cannot render Avro schema")
            .with_source(e)
    })
}

/// Encode `value` as a raw datum into `buf`, replacing its contents.
pub fn encode_datum(schema: &Schema, value: Value, buf: &mut Vec<u8>) -> Result<()> {
    let encoded = apache_avro::to_avro_datum(schema, value).map_err(|e| {
        PipesError::serialization_with_code(ErrorCode::SERIAL_ENCODE, "Cannot encode Avro datum")
            .with_source(e)
    })?;
    buf.clear();
    buf.extend_from_slice(&encoded);
    Ok(())
}

pub fn decode_datum(schema: &Schema, bytes: &[u8]) -> Result<Value> {
    apache_avro::from_avro_datum(schema, &mut &bytes[..], None).map_err(|e| {
        PipesError::serialization_with_code(ErrorCode::SERIAL_DECODE, "Cannot decode Avro datum")
            .with_source(e)
    })
}

/// Publish the output side of a job: the mode and one schema per slot.
pub fn set_output_schemas(
    conf: &mut JobConf,
    mode: AvroIoMode,
    key_schema: Option<&Schema>,
    value_schema: Option<&Schema>,
) -> Result<()> {
    conf.set(keys::AVRO_OUTPUT, mode.as_str());
    if let Some(schema) = key_schema {
        conf.set(keys::AVRO_KEY_OUTPUT_SCHEMA, schema_json(schema)?);
    }
    if let Some(schema) = value_schema {
        conf.set(keys::AVRO_VALUE_OUTPUT_SCHEMA, schema_json(schema)?);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use apache_avro::types::Value;

    pub const USER_SCHEMA: &str = r#"{
        "type": "record",
        "name": "User",
        "fields": [
            {"name": "name", "type": "string"},
            {"name": "office", "type": "string"},
            {"name": "favorite_number", "type": ["null", "int"]}
        ]
    }"#;

    pub fn user(name: &str, office: &str, number: Option<i32>) -> Value {
        Value::Record(vec![
            ("name".to_string(), Value::String(name.to_string())),
            ("office".to_string(), Value::String(office.to_string())),
            (
                "favorite_number".to_string(),
                match number {
                    Some(n) => Value::Union(1, Box::new(Value::Int(n))),
                    None => Value::Union(0, Box::new(Value::Null)),
                },
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{user, USER_SCHEMA};
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("K".parse::<AvroIoMode>().unwrap(), AvroIoMode::Key);
        assert_eq!("kv".parse::<AvroIoMode>().unwrap(), AvroIoMode::KeyValue);
        assert!("X".parse::<AvroIoMode>().is_err());

        let mut conf = JobConf::new();
        assert_eq!(AvroIoMode::from_conf(&conf, keys::AVRO_INPUT).unwrap(), None);
        conf.set(keys::AVRO_INPUT, "Q");
        let err = AvroIoMode::from_conf(&conf, keys::AVRO_INPUT).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
    }

    #[test]
    fn test_datum_round_trip() {
        let schema = parse_schema(USER_SCHEMA).unwrap();
        let record = user("alyssa", "B1", Some(7));
        let mut buf = vec![0xff; 3];

        encode_datum(&schema, record.clone(), &mut buf).unwrap();
        assert_eq!(decode_datum(&schema, &buf).unwrap(), record);
    }

    #[test]
    fn test_schema_json_parses_back() {
        let schema = parse_schema(USER_SCHEMA).unwrap();
        let json = schema_json(&schema).unwrap();
        assert_eq!(parse_schema(&json).unwrap(), schema);
    }

    #[test]
    fn test_bad_schema_is_serialization_error() {
        let err = parse_schema("{\"type\": \"nope\"}").unwrap_err();
        assert_eq!(err.code(), ErrorCode::SERIAL_SCHEMA_PARSE);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let schema = parse_schema(USER_SCHEMA).unwrap();
        let err = decode_datum(&schema, &[0x02]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SERIAL_DECODE);
    }
}

