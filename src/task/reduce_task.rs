//! Reduce-side driver. The worker is started lazily on the first key.

use crate::bridge::{Application, ApplicationBuilder};
use crate::config::JobConf;
use crate::error::{PipesError, Result};
use crate::subprocess::{self, WorkerLauncher};
use crate::task::{MemoryRecordWriter, RecordWriter, TaskContext};
use std::sync::Arc;

pub struct ReduceTask {
    conf: JobConf,
    context: Arc<dyn TaskContext>,
    launcher: Arc<dyn WorkerLauncher>,
    partition: u32,
    output: Option<Box<dyn RecordWriter>>,
    application: Option<Application>,
    skip_records: bool,
    is_ok: bool,
}

impl ReduceTask {
    pub fn new(conf: JobConf, context: Arc<dyn TaskContext>, output: Box<dyn RecordWriter>) -> Self {
        let skip_records = conf.get_bool(crate::config::keys::SKIP_RECORDS, false);
        Self {
            conf,
            context,
            launcher: subprocess::production(),
            partition: 0,
            output: Some(output),
            application: None,
            skip_records,
            is_ok: true,
        }
    }

    pub fn launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Partition announced in RUN_REDUCE.
    pub fn partition(mut self, partition: u32) -> Self {
        self.partition = partition;
        self
    }

    async fn application(&mut self) -> Result<&mut Application> {
        if self.application.is_none() {
            let output = self
                .output
                .take()
                .unwrap_or_else(|| Box::new(MemoryRecordWriter::new()) as Box<dyn RecordWriter>);
            let mut application = ApplicationBuilder::new(self.conf.clone(), Arc::clone(&self.context))
                .output(output)
                .launcher(Arc::clone(&self.launcher))
                .start()
                .await?;

            let piped_output = application.config().piped_output();
            if let Err(e) = application
                .downlink()
                .run_reduce(self.partition, piped_output)
                .await
            {
                application.cleanup().await;
                return Err(e);
            }
            self.application = Some(application);
        }

        self.application
            .as_mut()
            .ok_or_else(|| PipesError::worker("Worker application is not running"))
    }

    /// Send one key and all of its values.
    pub async fn reduce<I, V>(&mut self, key: &[u8], values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        self.is_ok = false;
        let skip_records = self.skip_records;
        let application = self.application().await?;
        let handler = Arc::clone(application.handler());
        let downlink = application.downlink();

        handler.check()?;
        downlink.reduce_key(key).await?;
        for value in values {
            handler.check()?;
            downlink.reduce_value(value.as_ref()).await?;
        }
        if skip_records {
            downlink.flush().await?;
        }
        self.is_ok = true;
        Ok(())
    }

    /// Close the input (or abort it when a reduce call failed), wait for
    /// the worker and release it. Must be called even after a failed
    /// `reduce`.
    pub async fn finish(mut self) -> Result<()> {
        let outcome = self.finish_session().await;
        if let Some(application) = self.application.as_mut() {
            application.cleanup().await;
        }
        outcome
    }

    async fn finish_session(&mut self) -> Result<()> {
        let is_ok = self.is_ok;
        let application = self.application().await?;

        let sent = if is_ok {
            application.downlink().end_of_input().await
        } else {
            tracing::warn!("A reduce call failed, aborting the worker");
            application.downlink().abort().await
        };
        let result = match sent {
            Ok(()) => application.wait_for_finish().await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(application.abort(e).await),
        }
    }
}
