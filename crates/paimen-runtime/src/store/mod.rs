//! Durable record of consumer specifications.
//!
//! The store is deliberately dumb: CRUD plus a status setter, each operation
//! individually atomic. It carries no knowledge of runtime state beyond the
//! status field it persists; keeping the status/registry invariant is the
//! supervisor's job, which is why all mutations are routed through it.

use paimen_core::{ConsumerSpec, ConsumerStatus, StoreError};
use uuid::Uuid;

pub mod memory;

pub use memory::MemoryStore;

/// Authoritative configuration record for managed consumers.
///
/// The reference implementation is in-memory; a relational or KV backing
/// implements the same contract.
pub trait SpecStore: Send + Sync {
    /// Persist a new spec. `Conflict` if the id already exists.
    fn create(&self, spec: ConsumerSpec) -> Result<(), StoreError>;

    fn get(&self, id: Uuid) -> Result<ConsumerSpec, StoreError>;

    /// All specs, ordered by creation time.
    fn list(&self) -> Result<Vec<ConsumerSpec>, StoreError>;

    /// Replace an existing spec wholesale.
    fn update(&self, spec: ConsumerSpec) -> Result<(), StoreError>;

    fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Update only the runtime status and its associated error text.
    fn set_status(
        &self,
        id: Uuid,
        status: ConsumerStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;
}
