//! # Paimen Runtime
//!
//! The moving parts of the consumer control plane:
//!
//! - [`supervisor::ConsumerSupervisor`] — the process-wide registry and
//!   lifecycle owner for managed consumers.
//! - [`extractor::MessageExtractor`] — one running consumer: a Kafka client,
//!   a poll task and its processor pipeline.
//! - [`processor`] — the sink strategies (file, database, HTTP forwarder)
//!   and the factory that builds them from `(type, config)` pairs.
//! - [`inspector::LagInspector`] — read-only consumer group offset and lag
//!   queries over short-lived admin clients.
//! - [`store`] — the spec store contract plus the in-memory reference
//!   implementation.

pub mod extractor;
pub mod inspector;
pub mod processor;
pub mod record;
pub mod store;
pub mod supervisor;

pub use extractor::{ExtractorConfig, ExtractorError, ExtractorStatus, MessageExtractor};
pub use inspector::{GroupOffsets, LagInspector, PartitionLag, PartitionOffset};
pub use processor::{Processor, ProcessorError, ProcessorFactory};
pub use record::SinkRecord;
pub use store::{MemoryStore, SpecStore};
pub use supervisor::{
    ConsumerSupervisor, JournalEntry, LifecycleOutcome, OpKind, SupervisorSettings,
};
