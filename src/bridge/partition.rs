//! Partition overrides and the partitioner adapter.
//!
//! A worker may pick the partition for a record itself (PARTITIONED_OUTPUT).
//! The chosen number is parked in a [`PartitionSlot`] and consumed by the very
//! next partitioner call; everything else goes through the configured
//! partitioner.

use crate::config::{keys, JobConf};
use crate::error::{ErrorCode, PipesError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One-shot partition override shared by the uplink and the output collector.
#[derive(Debug, Clone, Default)]
pub struct PartitionSlot {
    slot: Arc<Mutex<Option<u32>>>,
}

impl PartitionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, partition: u32) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stale) = slot.replace(partition) {
            tracing::warn!("Partition override {} was never consumed", stale);
        }
    }

    /// Consume the override, leaving the slot empty.
    pub fn take(&self) -> Option<u32> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

pub trait Partitioner: Send + Sync {
    fn get_partition(&self, key: &[u8], value: &[u8], num_partitions: u32) -> u32;
}

/// Same placement as Hadoop's `HashPartitioner` over serialized `Text` keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitioner;

impl HashPartitioner {
    pub fn hash_bytes(bytes: &[u8]) -> i32 {
        bytes.iter().fold(1i32, |hash, b| {
            hash.wrapping_mul(31).wrapping_add(i32::from(*b as i8))
        })
    }
}

impl Partitioner for HashPartitioner {
    fn get_partition(&self, key: &[u8], _value: &[u8], num_partitions: u32) -> u32 {
        if num_partitions == 0 {
            return 0;
        }
        ((Self::hash_bytes(key) & i32::MAX) as u32) % num_partitions
    }
}

/// Routes everything to partition 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePartitioner;

impl Partitioner for SinglePartitioner {
    fn get_partition(&self, _key: &[u8], _value: &[u8], _num_partitions: u32) -> u32 {
        0
    }
}

/// Honours a pending override, otherwise asks the delegate.
pub struct PipesPartitioner {
    slot: PartitionSlot,
    delegate: Box<dyn Partitioner>,
}

impl PipesPartitioner {
    pub fn new(slot: PartitionSlot, delegate: Box<dyn Partitioner>) -> Self {
        Self { slot, delegate }
    }

    /// Build from the partitioner name saved under `mapreduce.pipes.partitioner`.
    pub fn from_job_conf(
        conf: &JobConf,
        registry: &PartitionerRegistry,
        slot: PartitionSlot,
    ) -> Result<Self> {
        let delegate = registry.create(conf.get(keys::PARTITIONER))?;
        Ok(Self::new(slot, delegate))
    }

    pub fn slot(&self) -> &PartitionSlot {
        &self.slot
    }
}

impl Partitioner for PipesPartitioner {
    fn get_partition(&self, key: &[u8], value: &[u8], num_partitions: u32) -> u32 {
        match self.slot.take() {
            Some(partition) => partition,
            None => self.delegate.get_partition(key, value, num_partitions),
        }
    }
}

type PartitionerFactory = Box<dyn Fn() -> Box<dyn Partitioner> + Send + Sync>;

/// Named partitioner constructors.
pub struct PartitionerRegistry {
    factories: HashMap<String, PartitionerFactory>,
}

impl PartitionerRegistry {
    pub const DEFAULT: &'static str = "hash";

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Partitioner> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// `None` or an empty name selects the hash partitioner.
    pub fn create(&self, name: Option<&str>) -> Result<Box<dyn Partitioner>> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let name = name.unwrap_or(Self::DEFAULT);
        self.factories.get(name).map(|factory| factory()).ok_or_else(|| {
            PipesError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("Unknown partitioner '{}'", name),
                Some(keys::PARTITIONER.to_string()),
            )
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PartitionerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Self::DEFAULT, || Box::new(HashPartitioner));
        registry.register("org.apache.hadoop.mapreduce.lib.partition.HashPartitioner", || {
            Box::new(HashPartitioner)
        });
        registry.register("single", || Box::new(SinglePartitioner));
        registry
    }
}
