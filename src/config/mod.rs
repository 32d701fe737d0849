//! Job configuration for the bridge.
//!
//! The host hands every task a flat string-to-string dictionary ([`JobConf`]).
//! [`PipesConfig`] is the typed view of the keys the bridge itself acts on;
//! it is built once per task attempt and passed explicitly to whoever needs it.

pub mod keys;
pub mod loader;

use crate::error::{common, ErrorCode, PipesError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use loader::load_job_conf;

/// Flat job configuration shared by the host and the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobConf {
    entries: BTreeMap<String, String>,
}

impl JobConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Boolean lookup; anything other than `true`/`false` falls back to the default.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            _ => default,
        }
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, value.to_string());
    }

    pub fn get_u32(&self, key: &str, default: u32) -> Result<u32> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| common::invalid_config(key, raw, "a non-negative integer")),
        }
    }

    /// Optional millisecond duration; unset or empty means "no limit".
    pub fn get_millis(&self, key: &str) -> Result<Option<Duration>> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(|ms| Some(Duration::from_millis(ms)))
                .map_err(|_| common::invalid_config(key, raw, "milliseconds")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply `PIPES_BRIDGE_*` overrides from the process environment.
    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(|name| std::env::var(name).ok());
    }

    pub(crate) fn merge_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        const OVERRIDES: &[(&str, &str)] = &[
            ("PIPES_BRIDGE_EXECUTABLE", keys::EXECUTABLE),
            ("PIPES_BRIDGE_INTERPRETER", keys::INTERPRETER),
            ("PIPES_BRIDGE_PRESERVE_COMMANDS", keys::PRESERVE_COMMAND_FILE),
            ("PIPES_BRIDGE_AUTH_TIMEOUT_MS", keys::AUTH_TIMEOUT_MS),
            ("PIPES_BRIDGE_FINISH_TIMEOUT_MS", keys::FINISH_TIMEOUT_MS),
        ];

        for (var, key) in OVERRIDES {
            if let Some(value) = lookup(var) {
                tracing::debug!("Overriding {} from {}", key, var);
                self.set(*key, value);
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobConf {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Typed view of the bridge settings for one task attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PipesConfig {
    pub executable: String,
    pub interpreter: Option<String>,
    pub java_record_reader: bool,
    pub java_record_writer: bool,
    pub java_mapper: bool,
    pub java_reducer: bool,
    pub num_reduces: u32,
    pub skip_records: bool,
    pub preserve_command_file: bool,
    pub auth_timeout: Option<Duration>,
    pub finish_timeout: Option<Duration>,
}

impl PipesConfig {
    pub fn from_job_conf(conf: &JobConf) -> Result<Self> {
        let executable = conf
            .get(keys::EXECUTABLE)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| common::missing_config(keys::EXECUTABLE))?
            .to_string();

        let interpreter = conf
            .get(keys::INTERPRETER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let config = Self {
            executable,
            interpreter,
            java_record_reader: conf.get_bool(keys::IS_JAVA_RECORD_READER, false),
            java_record_writer: conf.get_bool(keys::IS_JAVA_RECORD_WRITER, false),
            java_mapper: conf.get_bool(keys::IS_JAVA_MAPPER, false),
            java_reducer: conf.get_bool(keys::IS_JAVA_REDUCER, false),
            num_reduces: conf.get_u32(keys::NUM_REDUCES, 1)?,
            skip_records: conf.get_bool(keys::SKIP_RECORDS, false),
            preserve_command_file: conf.get_bool(keys::PRESERVE_COMMAND_FILE, false),
            auth_timeout: conf.get_millis(keys::AUTH_TIMEOUT_MS)?,
            finish_timeout: conf.get_millis(keys::FINISH_TIMEOUT_MS)?,
        };

        if config.java_mapper && !config.java_record_reader {
            return Err(PipesError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "A host-side mapper requires the host to read the input",
                Some(keys::IS_JAVA_MAPPER.to_string()),
            ));
        }

        Ok(config)
    }

    /// The host reads the input and pipes each record to the worker.
    pub fn piped_input(&self) -> bool {
        self.java_record_reader && !self.java_mapper
    }

    /// The host writes whatever the worker reduces.
    pub fn piped_output(&self) -> bool {
        self.java_record_writer
    }
}

#[cfg(test)]
mod tests;
