//! Downstream processor contract and the built-in sink strategies.
//!
//! A [`Processor`] is one sink: it consumes records and never talks back to
//! the consumer that feeds it. Implementations may buffer internally but
//! must tolerate `close()` after any `process()` call.

use async_trait::async_trait;
use uuid::Uuid;

use crate::record::SinkRecord;

pub mod database_sync;
pub mod factory;
pub mod file_sink;
pub mod forwarder;

pub use database_sync::DatabaseSync;
pub use factory::ProcessorFactory;
pub use file_sink::FileSink;
pub use forwarder::StreamingForwarder;

/// Failure modes a processor can report for one record.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Filesystem-level failure (unwritable path, disk full).
    #[error("I/O failure: {0}")]
    Io(String),

    /// Retryable failure: connection refused, timeout, 5xx.
    #[error("transient sink failure: {0}")]
    Transient(String),

    /// Non-retryable failure: schema mismatch, rejected payload.
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

impl ProcessorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<std::io::Error> for ProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// One sink strategy.
///
/// `process` takes `&self` so a single instance can be shared with the poll
/// task behind an `Arc`; implementations guard their mutable state.
#[async_trait]
pub trait Processor: Send + Sync + std::fmt::Debug {
    /// Stable identifier from the owning [`ProcessorConfig`](paimen_core::ProcessorConfig).
    fn id(&self) -> Uuid;

    /// The registered type tag this processor was built from.
    fn kind(&self) -> &str;

    /// Consume one record.
    async fn process(&self, record: &SinkRecord) -> Result<(), ProcessorError>;

    /// Flush buffers and release resources. Safe to call at any point after
    /// construction, including repeatedly.
    async fn close(&self) -> Result<(), ProcessorError>;
}
