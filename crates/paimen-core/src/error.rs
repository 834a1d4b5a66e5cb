//! Error taxonomy shared by the supervisor, store and HTTP surface.

use uuid::Uuid;

/// Errors raised by a specification store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("spec not found: {0}")]
    NotFound(Uuid),

    #[error("spec already exists: {0}")]
    Conflict(Uuid),

    #[error("store I/O failure: {0}")]
    Io(String),
}

/// Errors surfaced by control-plane operations.
///
/// Each variant maps to exactly one HTTP status; the server owns that
/// mapping so the runtime stays transport-agnostic.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Consumer id or consumer group unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (missing field, malformed value).
    #[error("invalid configuration: {0}")]
    BadConfig(String),

    /// Processor type has no registered constructor.
    #[error("unknown processor type: {0}")]
    UnknownType(String),

    /// Kafka client construction or initial connect failed.
    #[error("kafka client init failed: {0}")]
    ClientInit(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stop or inspector call exceeded its configured bound.
    #[error("operation timed out: {0}")]
    TimedOut(String),

    /// A mutation observed inconsistent state.
    #[error("conflicting state: {0}")]
    Conflict(String),
}

impl ControlError {
    pub fn not_found(id: Uuid) -> Self {
        Self::NotFound(id.to_string())
    }
}
