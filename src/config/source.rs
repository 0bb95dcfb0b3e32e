//! Configuration sources polled by the listen loop for hot reload.

use super::ListenerConfig;
use crate::lock::lock_or_recover;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Supplies the current configuration on every poll.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ListenerConfig>;
}

/// Hash of the settings that require rebuilding the pipeline.
///
/// Logging and CLI-only switches are not serialized, so toggling them never
/// triggers a reload.
pub fn config_hash(config: &ListenerConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    match serde_json::to_string(config) {
        Ok(json) => json.hash(&mut hasher),
        Err(err) => {
            tracing::warn!(error = %err, "config serialization failed; hashing debug form");
            format!("{config:?}").hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// In-memory configuration that callers can replace at runtime.
#[derive(Debug)]
pub struct StaticConfig {
    inner: Mutex<ListenerConfig>,
}

impl StaticConfig {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    pub fn set(&self, config: ListenerConfig) {
        *lock_or_recover(&self.inner, "static_config") = config;
    }

    pub fn update(&self, apply: impl FnOnce(&mut ListenerConfig)) {
        let mut guard = lock_or_recover(&self.inner, "static_config");
        apply(&mut guard);
    }
}

impl ConfigSource for StaticConfig {
    fn load(&self) -> Result<ListenerConfig> {
        Ok(lock_or_recover(&self.inner, "static_config").clone())
    }
}

/// Base configuration with a JSON object of overrides layered on top.
///
/// The file is re-read on every poll; a missing file yields the base config.
#[derive(Debug, Clone)]
pub struct JsonFileConfig {
    base: ListenerConfig,
    path: PathBuf,
}

impl JsonFileConfig {
    pub fn new(base: ListenerConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            base,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for JsonFileConfig {
    fn load(&self) -> Result<ListenerConfig> {
        if !self.path.exists() {
            return Ok(self.base.clone());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read config '{}'", self.path.display()))?;
        let overrides: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in '{}'", self.path.display()))?;
        let mut merged = apply_overrides(&self.base, overrides)
            .with_context(|| format!("invalid settings in '{}'", self.path.display()))?;
        merged.validate()?;
        Ok(merged)
    }
}

fn apply_overrides(base: &ListenerConfig, overrides: Value) -> Result<ListenerConfig> {
    let Value::Object(entries) = overrides else {
        return Err(anyhow!("config overrides must be a JSON object"));
    };
    let mut value = serde_json::to_value(base)?;
    let Value::Object(fields) = &mut value else {
        return Err(anyhow!("listener config did not serialize to an object"));
    };
    for (key, entry) in entries {
        if !fields.contains_key(&key) {
            return Err(anyhow!("unknown listener setting '{key}'"));
        }
        fields.insert(key, entry);
    }
    let mut merged: ListenerConfig = serde_json::from_value(value)?;
    // CLI-only switches are not part of the serialized form.
    merged.list_input_devices = base.list_input_devices;
    merged.config_file = base.config_file.clone();
    merged.logs = base.logs;
    merged.no_logs = base.no_logs;
    merged.log_timings = base.log_timings;
    Ok(merged)
}
