//! Configuration keys understood by the bridge.

pub const EXECUTABLE: &str = "mapreduce.pipes.executable";
pub const INTERPRETER: &str = "mapreduce.pipes.executable.interpretor";
pub const IS_JAVA_MAPPER: &str = "mapreduce.pipes.isjavamapper";
pub const IS_JAVA_REDUCER: &str = "mapreduce.pipes.isjavareducer";
pub const IS_JAVA_RECORD_READER: &str = "mapreduce.pipes.isjavarecordreader";
pub const IS_JAVA_RECORD_WRITER: &str = "mapreduce.pipes.isjavarecordwriter";
pub const PARTITIONER: &str = "mapreduce.pipes.partitioner";
pub const INPUT_FORMAT: &str = "mapreduce.pipes.inputformat";
pub const PRESERVE_COMMAND_FILE: &str = "mapreduce.pipes.commandfile.preserve";
pub const AUTH_TIMEOUT_MS: &str = "mapreduce.pipes.auth.timeout.ms";
pub const FINISH_TIMEOUT_MS: &str = "mapreduce.pipes.finish.timeout.ms";

pub const EXTERNAL_SPLITS_ENABLED: &str = "mapreduce.pipes.externalsplits.enabled";
pub const EXTERNAL_SPLITS_URI: &str = "mapreduce.pipes.externalsplits.uri";

pub const AVRO_INPUT: &str = "mapreduce.pipes.avro.input";
pub const AVRO_OUTPUT: &str = "mapreduce.pipes.avro.output";
pub const AVRO_KEY_INPUT_SCHEMA: &str = "mapreduce.pipes.avro.key.input.schema";
pub const AVRO_VALUE_INPUT_SCHEMA: &str = "mapreduce.pipes.avro.value.input.schema";
pub const AVRO_KEY_OUTPUT_SCHEMA: &str = "mapreduce.pipes.avro.key.output.schema";
pub const AVRO_VALUE_OUTPUT_SCHEMA: &str = "mapreduce.pipes.avro.value.output.schema";

pub const NUM_REDUCES: &str = "mapreduce.job.reduces";
pub const SKIP_RECORDS: &str = "mapreduce.job.skiprecords";

/// Environment variables read by the worker at startup.
pub const ENV_COMMAND_PORT: &str = "mapreduce.pipes.command.port";
pub const ENV_SECRET_LOCATION: &str = "hadoop.pipes.shared.secret.location";

/// File names created inside the task work directory.
pub const SECRET_FILE_NAME: &str = "jobTokenPassword";
pub const COMMAND_FILE_NAME: &str = "downlink.data";
