//! Consumer specification types and request validation.
//!
//! A [`ConsumerSpec`] is the persisted, authoritative record of one managed
//! consumer. Drafts and patches are the wire-side shapes accepted by the
//! REST layer; the supervisor turns them into specs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ControlError;

/// Operator-visible state of a managed consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerStatus {
    Inactive,
    Active,
    Error,
}

impl std::fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "INACTIVE"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Declarative parameters of one downstream sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub id: Uuid,
    /// Registered processor type tag (`file_sink`, `database_sync`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque settings, interpreted only by the matching processor.
    #[serde(default)]
    pub config: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted configuration of one consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    pub id: Uuid,
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Applied only at creation time.
    pub auto_start: bool,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
    pub status: ConsumerStatus,
    /// Human-readable reason when `status` is ERROR.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConsumerSpec {
    /// Kafka bootstrap endpoint in `host:port` form.
    pub fn bootstrap(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

/// Processor entry as submitted on create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorDraft {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl ProcessorDraft {
    fn into_config(self, now: DateTime<Utc>) -> ProcessorConfig {
        ProcessorConfig {
            id: Uuid::new_v4(),
            kind: self.kind,
            config: self.config,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request body for creating a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerDraft {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub group_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub processors: Vec<ProcessorDraft>,
}

impl ConsumerDraft {
    /// Materialize the draft into a spec with a fresh id.
    ///
    /// Status starts INACTIVE; the supervisor flips it once an extractor is
    /// actually running.
    pub fn into_spec(self, now: DateTime<Utc>) -> ConsumerSpec {
        ConsumerSpec {
            id: Uuid::new_v4(),
            broker_host: self.broker_host,
            broker_port: self.broker_port,
            topic: self.topic,
            group_id: self.group_id,
            client_id: self.client_id,
            auto_start: self.auto_start,
            processors: self
                .processors
                .into_iter()
                .map(|p| p.into_config(now))
                .collect(),
            status: ConsumerStatus::Inactive,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to an existing spec. Absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerPatch {
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub client_id: Option<String>,
    pub processors: Option<Vec<ProcessorDraft>>,
}

impl ConsumerPatch {
    pub fn is_empty(&self) -> bool {
        self.broker_host.is_none()
            && self.broker_port.is_none()
            && self.topic.is_none()
            && self.group_id.is_none()
            && self.client_id.is_none()
            && self.processors.is_none()
    }
}

/// What a patch changed, from the extractor's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Broker endpoint, topic or group changed: a running extractor must be
    /// rebuilt from scratch.
    pub connection_changed: bool,
    /// Processor list changed: a running extractor can swap in place.
    pub processors_changed: bool,
}

impl ConsumerSpec {
    /// Apply `patch`, returning what changed. Timestamps always advance.
    pub fn apply_patch(&mut self, patch: ConsumerPatch, now: DateTime<Utc>) -> PatchOutcome {
        let mut outcome = PatchOutcome::default();

        if let Some(host) = patch.broker_host {
            outcome.connection_changed |= host != self.broker_host;
            self.broker_host = host;
        }
        if let Some(port) = patch.broker_port {
            outcome.connection_changed |= port != self.broker_port;
            self.broker_port = port;
        }
        if let Some(topic) = patch.topic {
            outcome.connection_changed |= topic != self.topic;
            self.topic = topic;
        }
        if let Some(group) = patch.group_id {
            outcome.connection_changed |= group != self.group_id;
            self.group_id = group;
        }
        if let Some(client_id) = patch.client_id {
            self.client_id = Some(client_id);
        }
        if let Some(processors) = patch.processors {
            outcome.processors_changed = true;
            self.processors = processors.into_iter().map(|p| p.into_config(now)).collect();
        }

        self.updated_at = now;
        outcome
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ControlError> {
    if value.trim().is_empty() {
        return Err(ControlError::BadConfig(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Shape-level validation of a create request. Processor types and their
/// config keys are checked by the factory, which owns the registration table.
pub fn validate_draft(draft: &ConsumerDraft) -> Result<(), ControlError> {
    require_non_empty(&draft.broker_host, "broker_host")?;
    require_non_empty(&draft.topic, "topic")?;
    require_non_empty(&draft.group_id, "group_id")?;
    if draft.broker_port == 0 {
        return Err(ControlError::BadConfig("broker_port must be non-zero".into()));
    }
    Ok(())
}

/// Shape-level validation of an update request.
pub fn validate_patch(patch: &ConsumerPatch) -> Result<(), ControlError> {
    if let Some(host) = &patch.broker_host {
        require_non_empty(host, "broker_host")?;
    }
    if let Some(topic) = &patch.topic {
        require_non_empty(topic, "topic")?;
    }
    if let Some(group) = &patch.group_id {
        require_non_empty(group, "group_id")?;
    }
    if patch.broker_port == Some(0) {
        return Err(ControlError::BadConfig("broker_port must be non-zero".into()));
    }
    Ok(())
}
