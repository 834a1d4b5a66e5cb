//! In-memory reference implementation of the spec store.

use std::sync::RwLock;

use paimen_core::{ConsumerSpec, ConsumerStatus, StoreError};
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::SpecStore;

/// Process-local spec store backed by a hash map.
#[derive(Default)]
pub struct MemoryStore {
    specs: RwLock<FxHashMap<Uuid, ConsumerSpec>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpecStore for MemoryStore {
    fn create(&self, spec: ConsumerSpec) -> Result<(), StoreError> {
        let mut specs = self.specs.write().map_err(poisoned)?;
        if specs.contains_key(&spec.id) {
            return Err(StoreError::Conflict(spec.id));
        }
        specs.insert(spec.id, spec);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<ConsumerSpec, StoreError> {
        self.specs
            .read()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<ConsumerSpec>, StoreError> {
        let mut specs: Vec<ConsumerSpec> =
            self.specs.read().map_err(poisoned)?.values().cloned().collect();
        specs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(specs)
    }

    fn update(&self, spec: ConsumerSpec) -> Result<(), StoreError> {
        let mut specs = self.specs.write().map_err(poisoned)?;
        if !specs.contains_key(&spec.id) {
            return Err(StoreError::NotFound(spec.id));
        }
        specs.insert(spec.id, spec);
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.specs
            .write()
            .map_err(poisoned)?
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    fn set_status(
        &self,
        id: Uuid,
        status: ConsumerStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut specs = self.specs.write().map_err(poisoned)?;
        let spec = specs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        spec.status = status;
        spec.last_error = last_error;
        spec.updated_at = chrono::Utc::now();
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Io("spec store lock poisoned".into())
}
