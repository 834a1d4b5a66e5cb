//! Processor construction from `(type, config)` pairs.
//!
//! The factory is the sole construction site for processors. New types
//! register once at startup via [`ProcessorFactory::register`]; afterwards
//! the table is only read.

use std::collections::HashMap;
use std::sync::Arc;

use paimen_core::{ControlError, ProcessorConfig};
use reqwest::Method;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{DatabaseSync, FileSink, Processor, StreamingForwarder};

/// Builds one processor from a validated config.
pub type BuilderFn =
    fn(Uuid, &Map<String, Value>) -> Result<Arc<dyn Processor>, ControlError>;

/// Checks a config without instantiating anything. Used by the supervisor so
/// a rejected create/update never opens files or sockets.
pub type ValidateFn = fn(&Map<String, Value>) -> Result<(), ControlError>;

struct Registration {
    build: BuilderFn,
    validate: ValidateFn,
}

/// Registration table mapping processor type tags to constructors.
pub struct ProcessorFactory {
    table: HashMap<String, Registration>,
}

impl ProcessorFactory {
    /// An empty factory; useful for tests and exotic deployments.
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Factory with the three built-in sink strategies registered.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register("file_sink", build_file_sink, validate_file_sink);
        factory.register("database_sync", build_database_sync, validate_database_sync);
        factory.register(
            "streaming_forwarder",
            build_streaming_forwarder,
            validate_streaming_forwarder,
        );
        factory
    }

    /// Register a new processor type. Later registrations win, which lets
    /// deployments shadow a built-in.
    pub fn register(&mut self, kind: &str, build: BuilderFn, validate: ValidateFn) {
        self.table
            .insert(kind.to_string(), Registration { build, validate });
    }

    pub fn known_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.table.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Validate a single config against the registration table.
    pub fn validate(&self, kind: &str, config: &Map<String, Value>) -> Result<(), ControlError> {
        let reg = self
            .table
            .get(kind)
            .ok_or_else(|| ControlError::UnknownType(kind.to_string()))?;
        (reg.validate)(config)
    }

    /// Validate every config; the first failure aborts the whole batch.
    pub fn validate_all(&self, configs: &[ProcessorConfig]) -> Result<(), ControlError> {
        for cfg in configs {
            self.validate(&cfg.kind, &cfg.config)?;
        }
        Ok(())
    }

    /// Build a single processor.
    pub fn build(&self, cfg: &ProcessorConfig) -> Result<Arc<dyn Processor>, ControlError> {
        let reg = self
            .table
            .get(&cfg.kind)
            .ok_or_else(|| ControlError::UnknownType(cfg.kind.clone()))?;
        (reg.validate)(&cfg.config)?;
        (reg.build)(cfg.id, &cfg.config)
    }

    /// Build the full pipeline, all-or-nothing.
    pub fn build_all(
        &self,
        configs: &[ProcessorConfig],
    ) -> Result<Vec<Arc<dyn Processor>>, ControlError> {
        configs.iter().map(|cfg| self.build(cfg)).collect()
    }
}

impl Default for ProcessorFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn require_str<'a>(
    config: &'a Map<String, Value>,
    key: &str,
    kind: &str,
) -> Result<&'a str, ControlError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            ControlError::BadConfig(format!("{kind} requires a non-empty string '{key}'"))
        })
}

fn optional_str(config: &Map<String, Value>, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

// --- file_sink ---------------------------------------------------------

fn validate_file_sink(config: &Map<String, Value>) -> Result<(), ControlError> {
    require_str(config, "file_path", "file_sink").map(|_| ())
}

fn build_file_sink(
    id: Uuid,
    config: &Map<String, Value>,
) -> Result<Arc<dyn Processor>, ControlError> {
    let path = require_str(config, "file_path", "file_sink")?;
    let sink = FileSink::new(id, path)
        .map_err(|e| ControlError::BadConfig(format!("file_sink '{path}': {e}")))?;
    Ok(Arc::new(sink))
}

// --- database_sync -----------------------------------------------------

fn validate_database_sync(config: &Map<String, Value>) -> Result<(), ControlError> {
    require_str(config, "db_dsn", "database_sync").map(|_| ())
}

fn build_database_sync(
    id: Uuid,
    config: &Map<String, Value>,
) -> Result<Arc<dyn Processor>, ControlError> {
    let dsn = require_str(config, "db_dsn", "database_sync")?;
    let table = optional_str(config, "table");
    Ok(Arc::new(DatabaseSync::new(id, dsn, table)))
}

// --- streaming_forwarder ------------------------------------------------

fn validate_streaming_forwarder(config: &Map<String, Value>) -> Result<(), ControlError> {
    require_str(config, "url", "streaming_forwarder")?;
    if let Some(method) = optional_str(config, "method") {
        method
            .parse::<Method>()
            .map_err(|_| ControlError::BadConfig(format!("invalid HTTP method '{method}'")))?;
    }
    if let Some(headers) = config.get("headers") {
        if !headers.is_object() {
            return Err(ControlError::BadConfig(
                "streaming_forwarder 'headers' must be an object of strings".into(),
            ));
        }
    }
    Ok(())
}

fn build_streaming_forwarder(
    id: Uuid,
    config: &Map<String, Value>,
) -> Result<Arc<dyn Processor>, ControlError> {
    let url = require_str(config, "url", "streaming_forwarder")?;
    let mut forwarder = StreamingForwarder::new(id, url);

    if let Some(method) = optional_str(config, "method") {
        let method = method
            .parse::<Method>()
            .map_err(|_| ControlError::BadConfig(format!("invalid HTTP method '{method}'")))?;
        forwarder = forwarder.with_method(method);
    }
    if let Some(headers) = config.get("headers").and_then(Value::as_object) {
        for (k, v) in headers {
            if let Some(v) = v.as_str() {
                forwarder = forwarder.with_header(k, v);
            }
        }
    }
    if let Some(max_retries) = config.get("max_retries").and_then(Value::as_u64) {
        forwarder = forwarder.with_max_retries(max_retries as u32);
    }
    Ok(Arc::new(forwarder))
}
