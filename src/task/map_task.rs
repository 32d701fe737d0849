//! Map-side driver: feeds one split to the worker.

use crate::bridge::partition::PartitionSlot;
use crate::bridge::{Application, ApplicationBuilder};
use crate::config::{JobConf, PipesConfig};
use crate::error::Result;
use crate::subprocess::{self, WorkerLauncher};
use crate::task::{RecordReader, RecordWriter, TaskContext, NULL_WRITABLE};
use std::sync::Arc;

pub struct MapTask {
    conf: JobConf,
    context: Arc<dyn TaskContext>,
    launcher: Arc<dyn WorkerLauncher>,
    partition_slot: PartitionSlot,
}

impl MapTask {
    pub fn new(conf: JobConf, context: Arc<dyn TaskContext>) -> Self {
        Self {
            conf,
            context,
            launcher: subprocess::production(),
            partition_slot: PartitionSlot::new(),
        }
    }

    pub fn launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Slot shared with the partitioner behind `output`.
    pub fn partition_slot(mut self, slot: PartitionSlot) -> Self {
        self.partition_slot = slot;
        self
    }

    /// Run the map attempt for `split`.
    ///
    /// When the host reads the input, every record of `input` is piped to
    /// the worker; otherwise the worker reads the split itself and `input`
    /// only relays its progress.
    pub async fn run(
        mut self,
        split: &[u8],
        mut input: Box<dyn RecordReader>,
        output: Box<dyn RecordWriter>,
    ) -> Result<()> {
        input.initialize(&mut self.conf, self.context.as_ref())?;
        let config = PipesConfig::from_job_conf(&self.conf)?;

        let mut builder = ApplicationBuilder::new(self.conf, Arc::clone(&self.context))
            .output(output)
            .partition_slot(self.partition_slot)
            .launcher(self.launcher);
        if !config.java_record_reader && !config.java_mapper {
            if let Some(cell) = input.progress_cell() {
                builder = builder.progress_cell(cell);
            }
        }

        let mut application = builder.start().await?;
        let outcome = match feed(&mut application, &config, split, input.as_mut()).await {
            Ok(()) => Ok(()),
            Err(e) => Err(application.abort(e).await),
        };
        application.cleanup().await;

        if let Err(e) = input.close() {
            tracing::warn!("Closing record reader failed: {}", e);
        }
        outcome
    }
}

async fn feed(
    application: &mut Application,
    config: &PipesConfig,
    split: &[u8],
    input: &mut dyn RecordReader,
) -> Result<()> {
    let piped_input = config.piped_input();
    let handler = Arc::clone(application.handler());
    let downlink = application.downlink();
    downlink
        .run_map(split, config.num_reduces, piped_input)
        .await?;

    if piped_input {
        let first = input
            .next_key_value()?
            .map(|(key, value)| (key.to_vec(), value.to_vec()));

        if let Some((key, value)) = first {
            downlink
                .set_input_types(
                    class_or_null(input.key_class()),
                    class_or_null(input.value_class()),
                )
                .await?;
            handler.check()?;
            downlink.map_item(&key, &value).await?;
            if config.skip_records {
                downlink.flush().await?;
            }

            let mut items = 1u64;
            while let Some((key, value)) = input.next_key_value()? {
                handler.check()?;
                downlink.map_item(key, value).await?;
                if config.skip_records {
                    downlink.flush().await?;
                }
                items += 1;
            }
            tracing::debug!("Piped {} records to the worker", items);
        }
        downlink.end_of_input().await?;
    }

    application.wait_for_finish().await?;
    Ok(())
}

fn class_or_null(class: &str) -> &str {
    if class.is_empty() {
        NULL_WRITABLE
    } else {
        class
    }
}
