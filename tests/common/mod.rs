//! Common test utilities and helpers

#![allow(dead_code)]

use pipes_bridge::config::keys;
use pipes_bridge::testing::FakeWorker;
use pipes_bridge::JobConf;
use std::sync::Arc;

/// Job configuration naming a worker executable that is never actually run.
pub fn job_conf(program: &str) -> JobConf {
    let mut conf = JobConf::new();
    conf.set(keys::EXECUTABLE, program);
    conf.set(keys::AUTH_TIMEOUT_MS, "5000");
    conf.set(keys::FINISH_TIMEOUT_MS, "5000");
    conf
}

/// Map-side configuration where the host reads and writes the records.
pub fn piped_map_conf() -> JobConf {
    let mut conf = job_conf("/opt/workers/map");
    conf.set_bool(keys::IS_JAVA_RECORD_READER, true);
    conf.set_bool(keys::IS_JAVA_RECORD_WRITER, true);
    conf
}

pub fn launcher(worker: FakeWorker) -> Arc<pipes_bridge::subprocess::MockWorkerLauncher> {
    Arc::new(worker.into_launcher())
}

pub fn records(pairs: &[(&str, &str)]) -> Vec<(Vec<u8>, Vec<u8>)> {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}
