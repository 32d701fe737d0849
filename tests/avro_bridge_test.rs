//! Avro records through a worker and back.

mod common;

use apache_avro::types::Value;
use apache_avro::{Schema, Writer};
use pipes_bridge::avro::{
    self, AvroBridgeReader, AvroBridgeWriter, AvroDatum, AvroIoMode, ContainerFileSource,
    MemoryAvroSource, MemoryAvroWriter,
};
use pipes_bridge::config::keys;
use pipes_bridge::testing::{FakeWorker, TestContext};
use pipes_bridge::MapTask;

const READING_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Reading",
    "fields": [
        {"name": "station", "type": "string"},
        {"name": "celsius", "type": "double"}
    ]
}"#;

fn reading(station: &str, celsius: f64) -> Value {
    Value::Record(vec![
        ("station".to_string(), Value::String(station.to_string())),
        ("celsius".to_string(), Value::Double(celsius)),
    ])
}

fn schema() -> Schema {
    avro::parse_schema(READING_SCHEMA).unwrap()
}

#[tokio::test]
async fn test_value_records_round_trip_through_worker() {
    let test = TestContext::new().unwrap();
    let schema = schema();
    let mut conf = common::piped_map_conf();
    avro::set_output_schemas(&mut conf, AvroIoMode::Value, None, Some(&schema)).unwrap();

    let sink = MemoryAvroWriter::new();
    let writer = AvroBridgeWriter::from_job_conf(&conf, Box::new(sink.clone())).unwrap();
    let reader = AvroBridgeReader::new(
        Box::new(MemoryAvroSource::values(
            schema.clone(),
            vec![reading("KSEA", 12.5), reading("KPDX", 9.0)],
        )),
        AvroIoMode::Value,
    );
    let worker = FakeWorker::new().echo();
    let transcript = worker.transcript();

    MapTask::new(conf, test.context.clone())
        .launcher(common::launcher(worker))
        .run(b"", Box::new(reader), Box::new(writer))
        .await
        .unwrap();

    assert_eq!(
        sink.written(),
        vec![
            (None, Some(AvroDatum::Record(reading("KSEA", 12.5)))),
            (None, Some(AvroDatum::Record(reading("KPDX", 9.0)))),
        ]
    );

    let pairs = transcript.job_conf().unwrap();
    let published = pairs
        .iter()
        .find(|(k, _)| k == keys::AVRO_VALUE_INPUT_SCHEMA)
        .map(|(_, v)| v.clone())
        .unwrap();
    assert_eq!(avro::parse_schema(&published).unwrap(), schema);
    assert!(pairs.contains(&(keys::AVRO_INPUT.to_string(), "V".to_string())));

    let counters = test.context.counters();
    assert_eq!(
        counters.value(avro::COUNTER_GROUP, avro::COUNTER_RECORDS),
        Some(2)
    );
}

#[tokio::test]
async fn test_key_records_come_back_with_null_marker() {
    let test = TestContext::new().unwrap();
    let schema = schema();
    let mut conf = common::piped_map_conf();
    avro::set_output_schemas(&mut conf, AvroIoMode::Key, Some(&schema), None).unwrap();

    let mut buf = Vec::new();
    let mut writer = Writer::new(&schema, &mut buf);
    writer.append(reading("EGLL", 4.0)).unwrap();
    writer.flush().unwrap();
    drop(writer);

    let source = ContainerFileSource::from_bytes(&buf, AvroIoMode::Key).unwrap();
    assert_eq!(source.len(), 1);

    let sink = MemoryAvroWriter::new();
    MapTask::new(conf.clone(), test.context.clone())
        .launcher(common::launcher(FakeWorker::new().echo()))
        .run(
            b"",
            Box::new(AvroBridgeReader::new(Box::new(source), AvroIoMode::Key)),
            Box::new(AvroBridgeWriter::from_job_conf(&conf, Box::new(sink.clone())).unwrap()),
        )
        .await
        .unwrap();

    assert_eq!(
        sink.written(),
        vec![(
            Some(AvroDatum::Record(reading("EGLL", 4.0))),
            Some(AvroDatum::NullMarker)
        )]
    );
}
