//! Process-wide consumer registry and lifecycle engine.
//!
//! The supervisor owns the `{consumer_id → extractor}` registry and is the
//! only writer of both the registry and the spec store, so the two stay in
//! agreement: a spec is ACTIVE exactly when a live extractor is registered
//! for it. Every mutating operation serializes on a per-id lock; operations
//! on distinct ids proceed in parallel, and reads never take the per-id lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use paimen_core::{
    validate_draft, validate_patch, ConsumerDraft, ConsumerPatch, ConsumerSpec, ConsumerStatus,
    ControlError, Settings, StoreError,
};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::extractor::{
    ExtractorConfig, ExtractorError, ExtractorFailure, ExtractorStatus, MessageExtractor,
};
use crate::processor::ProcessorFactory;
use crate::store::SpecStore;

const JOURNAL_CAPACITY: usize = 256;

/// Timeouts applied to every extractor the supervisor builds.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Settings> for SupervisorSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_timeout: settings.poll_timeout,
            stop_timeout: settings.stop_timeout,
        }
    }
}

/// Control operations recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Create,
    Update,
    Delete,
    Start,
    Stop,
}

/// One completed mutation, kept for operator visibility.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub op: OpKind,
    pub consumer_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Result of a start/stop request: the id plus the status it settled on.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleOutcome {
    pub id: Uuid,
    pub status: ConsumerStatus,
}

/// The in-process registry and lifecycle owner for all managed consumers.
pub struct ConsumerSupervisor {
    store: Arc<dyn SpecStore>,
    factory: Arc<ProcessorFactory>,
    settings: SupervisorSettings,
    registry: RwLock<FxHashMap<Uuid, Arc<MessageExtractor>>>,
    locks: Mutex<FxHashMap<Uuid, Arc<Mutex<()>>>>,
    failure_tx: mpsc::UnboundedSender<ExtractorFailure>,
    journal: std::sync::Mutex<VecDeque<JournalEntry>>,
}

impl ConsumerSupervisor {
    /// Build the supervisor and spawn its failure listener, which marks a
    /// spec ERROR when its extractor's poll loop dies.
    pub fn new(
        store: Arc<dyn SpecStore>,
        factory: Arc<ProcessorFactory>,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            store,
            factory,
            settings,
            registry: RwLock::new(FxHashMap::default()),
            locks: Mutex::new(FxHashMap::default()),
            failure_tx,
            journal: std::sync::Mutex::new(VecDeque::with_capacity(JOURNAL_CAPACITY)),
        });

        tokio::spawn(failure_listener(Arc::downgrade(&supervisor), failure_rx));
        supervisor
    }

    // --- control operations -------------------------------------------

    /// Create a consumer from a draft; start it immediately when
    /// `auto_start` is set. Nothing is persisted if validation, processor
    /// construction or the initial start fails.
    pub async fn create(&self, draft: ConsumerDraft) -> Result<ConsumerSpec, ControlError> {
        validate_draft(&draft)?;
        let mut spec = draft.into_spec(Utc::now());
        self.factory.validate_all(&spec.processors)?;

        if spec.auto_start {
            let processors = self.factory.build_all(&spec.processors)?;
            let extractor = self.build_extractor(&spec, processors);
            extractor.start().await.map_err(control_error)?;
            spec.status = ConsumerStatus::Active;
            if let Err(e) = self.store.create(spec.clone()) {
                let _ = extractor.stop().await;
                return Err(e.into());
            }
            self.registry.write().await.insert(spec.id, extractor);
        } else {
            self.store.create(spec.clone())?;
        }

        self.record(OpKind::Create, spec.id);
        info!(consumer_id = %spec.id, topic = %spec.topic, auto_start = spec.auto_start, "consumer created");
        Ok(spec)
    }

    /// Fetch one spec with its current status.
    pub async fn get(&self, id: Uuid) -> Result<ConsumerSpec, ControlError> {
        Ok(self.store.get(id)?)
    }

    /// All specs with their current status.
    pub async fn list(&self) -> Result<Vec<ConsumerSpec>, ControlError> {
        Ok(self.store.list()?)
    }

    /// Consumer group ids referenced by the stored specs, deduplicated.
    pub async fn known_groups(&self) -> Result<Vec<String>, ControlError> {
        let mut groups: Vec<String> = self
            .store
            .list()?
            .into_iter()
            .map(|spec| spec.group_id)
            .collect();
        groups.sort_unstable();
        groups.dedup();
        Ok(groups)
    }

    /// Start an inactive consumer. Starting an already active consumer is a
    /// no-op; a FAILED extractor is discarded and rebuilt, which is the
    /// operator's recovery path out of ERROR.
    pub async fn start(&self, id: Uuid) -> Result<LifecycleOutcome, ControlError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let spec = self.store.get(id)?;

        if let Some(existing) = self.registry.read().await.get(&id) {
            if existing.is_running() {
                return Ok(LifecycleOutcome {
                    id,
                    status: ConsumerStatus::Active,
                });
            }
        }

        let processors = self.factory.build_all(&spec.processors)?;
        let extractor = self.build_extractor(&spec, processors);
        extractor.start().await.map_err(control_error)?;

        self.registry.write().await.insert(id, extractor);
        self.store
            .set_status(id, ConsumerStatus::Active, None)?;

        self.record(OpKind::Start, id);
        info!(consumer_id = %id, "consumer started");
        Ok(LifecycleOutcome {
            id,
            status: ConsumerStatus::Active,
        })
    }

    /// Stop an active consumer. Stopping an inactive consumer is a no-op.
    /// A stop that exceeds the stop timeout leaves the spec in ERROR.
    pub async fn stop(&self, id: Uuid) -> Result<LifecycleOutcome, ControlError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        self.store.get(id)?;
        let extractor = self.registry.write().await.remove(&id);

        let status = match extractor {
            None => {
                // Not running; normalize ERROR specs back to INACTIVE only
                // through start, never through stop.
                let current = self.store.get(id)?;
                if current.status == ConsumerStatus::Active {
                    self.store.set_status(id, ConsumerStatus::Inactive, None)?;
                    ConsumerStatus::Inactive
                } else {
                    current.status
                }
            }
            Some(extractor) => match extractor.stop().await {
                Ok(()) => {
                    if let ExtractorStatus::Failed(reason) = extractor.status() {
                        // The loop died before the stop arrived.
                        self.store
                            .set_status(id, ConsumerStatus::Error, Some(reason))?;
                        ConsumerStatus::Error
                    } else {
                        self.store.set_status(id, ConsumerStatus::Inactive, None)?;
                        ConsumerStatus::Inactive
                    }
                }
                Err(ExtractorError::StopTimedOut(bound)) => {
                    let reason = format!("stop timed out after {bound:?}");
                    self.store
                        .set_status(id, ConsumerStatus::Error, Some(reason.clone()))?;
                    self.record(OpKind::Stop, id);
                    return Err(ControlError::TimedOut(reason));
                }
                Err(other) => {
                    self.store
                        .set_status(id, ConsumerStatus::Error, Some(other.to_string()))?;
                    self.record(OpKind::Stop, id);
                    return Err(control_error(other));
                }
            },
        };

        self.record(OpKind::Stop, id);
        info!(consumer_id = %id, "consumer stopped");
        Ok(LifecycleOutcome { id, status })
    }

    /// Apply a partial update. When the consumer is active, a processor-list
    /// change swaps the pipeline in place and a broker/topic/group change
    /// rebuilds the extractor.
    pub async fn update(
        &self,
        id: Uuid,
        patch: ConsumerPatch,
    ) -> Result<ConsumerSpec, ControlError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        validate_patch(&patch)?;
        let mut spec = self.store.get(id)?;

        if let Some(processors) = &patch.processors {
            for draft in processors {
                self.factory.validate(&draft.kind, &draft.config)?;
            }
        }

        let outcome = spec.apply_patch(patch, Utc::now());

        let running = match self.registry.read().await.get(&id) {
            Some(extractor) => extractor.is_running(),
            None => false,
        };

        if running && outcome.connection_changed {
            // Endpoint identity changed: the old client is useless. Stop it
            // and start a fresh extractor against the new endpoint.
            if let Some(old) = self.registry.write().await.remove(&id) {
                if let Err(e) = old.stop().await {
                    warn!(consumer_id = %id, error = %e, "stopping outdated extractor failed");
                }
            }
            let processors = self.factory.build_all(&spec.processors)?;
            let extractor = self.build_extractor(&spec, processors);
            match extractor.start().await {
                Ok(()) => {
                    self.registry.write().await.insert(id, extractor);
                    spec.status = ConsumerStatus::Active;
                    spec.last_error = None;
                }
                Err(e) => {
                    spec.status = ConsumerStatus::Error;
                    spec.last_error = Some(e.to_string());
                    self.store.update(spec.clone())?;
                    self.record(OpKind::Update, id);
                    return Err(control_error(e));
                }
            }
        } else if running && outcome.processors_changed {
            let processors = self.factory.build_all(&spec.processors)?;
            let extractor = self
                .registry
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| ControlError::Conflict(format!("extractor vanished for {id}")))?;
            extractor
                .replace_processors(processors)
                .await
                .map_err(control_error)?;
        }

        self.store.update(spec.clone())?;
        self.record(OpKind::Update, id);
        info!(consumer_id = %id, "consumer updated");
        Ok(spec)
    }

    /// Delete a consumer, stopping it first when active. Succeeds for every
    /// existing spec regardless of its status.
    pub async fn delete(&self, id: Uuid) -> Result<(), ControlError> {
        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        self.store.get(id)?;

        if let Some(extractor) = self.registry.write().await.remove(&id) {
            if let Err(e) = extractor.stop().await {
                warn!(consumer_id = %id, error = %e, "stop during delete failed; deleting anyway");
            }
        }

        self.store.delete(id)?;
        self.locks.lock().await.remove(&id);
        self.record(OpKind::Delete, id);
        info!(consumer_id = %id, "consumer deleted");
        Ok(())
    }

    /// Stop every extractor concurrently, each bounded by the stop timeout.
    /// Called once at server shutdown.
    pub async fn shutdown(&self) {
        let extractors: Vec<(Uuid, Arc<MessageExtractor>)> =
            self.registry.write().await.drain().collect();
        if extractors.is_empty() {
            return;
        }

        info!(count = extractors.len(), "stopping all consumers");
        let stops = extractors.into_iter().map(|(id, extractor)| async move {
            if let Err(e) = extractor.stop().await {
                warn!(consumer_id = %id, error = %e, "extractor did not stop cleanly");
            }
        });
        futures::future::join_all(stops).await;
    }

    // --- observation ---------------------------------------------------

    /// The most recent control operations, newest first.
    pub fn recent_operations(&self, limit: usize) -> Vec<JournalEntry> {
        let journal = self.journal.lock().expect("journal lock poisoned");
        journal.iter().rev().take(limit).cloned().collect()
    }

    /// Status of the live extractor for `id`, if one is registered.
    pub async fn extractor_status(&self, id: Uuid) -> Option<ExtractorStatus> {
        self.registry.read().await.get(&id).map(|e| e.status())
    }

    /// Number of registered extractors (running or failed).
    pub async fn registered_count(&self) -> usize {
        self.registry.read().await.len()
    }

    // --- internals -----------------------------------------------------

    fn build_extractor(
        &self,
        spec: &ConsumerSpec,
        processors: Vec<Arc<dyn crate::processor::Processor>>,
    ) -> Arc<MessageExtractor> {
        let config = ExtractorConfig {
            consumer_id: spec.id,
            brokers: spec.bootstrap(),
            topic: spec.topic.clone(),
            group_id: spec.group_id.clone(),
            client_id: spec.client_id.clone(),
            poll_timeout: self.settings.poll_timeout,
            stop_timeout: self.settings.stop_timeout,
        };
        Arc::new(MessageExtractor::new(
            config,
            processors,
            self.failure_tx.clone(),
        ))
    }

    async fn id_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn record(&self, op: OpKind, consumer_id: Uuid) {
        let mut journal = self.journal.lock().expect("journal lock poisoned");
        if journal.len() == JOURNAL_CAPACITY {
            journal.pop_front();
        }
        journal.push_back(JournalEntry {
            op,
            consumer_id,
            at: Utc::now(),
        });
    }
}

fn control_error(err: ExtractorError) -> ControlError {
    match err {
        ExtractorError::ClientInit(msg) => ControlError::ClientInit(msg),
        ExtractorError::StopTimedOut(bound) => {
            ControlError::TimedOut(format!("stop timed out after {bound:?}"))
        }
        ExtractorError::Failed(reason) => ControlError::Conflict(reason),
    }
}

/// Marks specs ERROR when their poll loop reports a fatal failure.
///
/// Failure messages can be stale: by the time one is processed, the consumer
/// may have been stopped, deleted or rebuilt. The listener therefore takes
/// the per-id lock and only records the failure while the failed extractor
/// is still the registered one.
async fn failure_listener(
    supervisor: std::sync::Weak<ConsumerSupervisor>,
    mut failure_rx: mpsc::UnboundedReceiver<ExtractorFailure>,
) {
    while let Some(failure) = failure_rx.recv().await {
        let Some(supervisor) = supervisor.upgrade() else {
            return;
        };
        let lock = supervisor.id_lock(failure.consumer_id).await;
        let _guard = lock.lock().await;

        let still_failed = match supervisor.registry.read().await.get(&failure.consumer_id) {
            Some(extractor) => matches!(extractor.status(), ExtractorStatus::Failed(_)),
            None => false,
        };
        if !still_failed {
            continue;
        }

        warn!(
            consumer_id = %failure.consumer_id,
            reason = %failure.reason,
            "extractor failed; marking spec ERROR"
        );
        match supervisor.store.set_status(
            failure.consumer_id,
            ConsumerStatus::Error,
            Some(failure.reason),
        ) {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => warn!(consumer_id = %failure.consumer_id, error = %e, "failed to record extractor failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use paimen_core::ProcessorDraft;
    use serde_json::Map;

    fn test_settings() -> SupervisorSettings {
        SupervisorSettings {
            poll_timeout: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(5),
        }
    }

    fn supervisor() -> Arc<ConsumerSupervisor> {
        ConsumerSupervisor::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ProcessorFactory::with_defaults()),
            test_settings(),
        )
    }

    fn file_sink_draft(dir: &std::path::Path, auto_start: bool) -> ConsumerDraft {
        serde_json::from_value(serde_json::json!({
            "broker_host": "localhost",
            "broker_port": 9092,
            "topic": "orders",
            "group_id": "orders-group",
            "auto_start": auto_start,
            "processors": [
                {"type": "file_sink", "config": {"file_path": dir.join("out.log").to_str().unwrap()}}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_without_auto_start_stays_inactive() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();

        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();
        assert_eq!(spec.status, ConsumerStatus::Inactive);
        assert_eq!(sup.registered_count().await, 0);

        let fetched = sup.get(spec.id).await.unwrap();
        assert_eq!(fetched, spec);
        // No sink was instantiated: validation does not touch the filesystem.
        assert!(!dir.path().join("out.log").exists());
    }

    #[tokio::test]
    async fn create_with_auto_start_is_active_with_a_live_extractor() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();

        let spec = sup.create(file_sink_draft(dir.path(), true)).await.unwrap();
        assert_eq!(spec.status, ConsumerStatus::Active);
        assert_eq!(
            sup.extractor_status(spec.id).await,
            Some(ExtractorStatus::Running)
        );

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_processor_type_rejects_the_whole_create() {
        let sup = supervisor();
        let draft: ConsumerDraft = serde_json::from_value(serde_json::json!({
            "broker_host": "h",
            "broker_port": 9092,
            "topic": "t",
            "group_id": "g",
            "processors": [{"type": "nonexistent", "config": {}}]
        }))
        .unwrap();

        let err = sup.create(draft).await.unwrap_err();
        assert!(matches!(err, ControlError::UnknownType(_)));
        // Nothing was persisted.
        assert!(sup.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_stop_round_trip() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();

        let started = sup.start(spec.id).await.unwrap();
        assert_eq!(started.status, ConsumerStatus::Active);
        assert_eq!(sup.get(spec.id).await.unwrap().status, ConsumerStatus::Active);

        let stopped = sup.stop(spec.id).await.unwrap();
        assert_eq!(stopped.status, ConsumerStatus::Inactive);
        assert_eq!(
            sup.get(spec.id).await.unwrap().status,
            ConsumerStatus::Inactive
        );
        assert_eq!(sup.registered_count().await, 0);
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op_with_one_extractor() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();

        sup.start(spec.id).await.unwrap();
        let again = sup.start(spec.id).await.unwrap();
        assert_eq!(again.status, ConsumerStatus::Active);
        assert_eq!(sup.registered_count().await, 1);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_starts_yield_exactly_one_extractor() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();

        let (a, b) = tokio::join!(sup.start(spec.id), sup.start(spec.id));
        assert_eq!(a.unwrap().status, ConsumerStatus::Active);
        assert_eq!(b.unwrap().status, ConsumerStatus::Active);
        assert_eq!(sup.registered_count().await, 1);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn stop_twice_is_a_no_op() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();

        sup.start(spec.id).await.unwrap();
        sup.stop(spec.id).await.unwrap();
        let again = sup.stop(spec.id).await.unwrap();
        assert_eq!(again.status, ConsumerStatus::Inactive);
    }

    #[tokio::test]
    async fn operations_on_unknown_ids_are_not_found() {
        let sup = supervisor();
        let id = Uuid::new_v4();
        assert!(matches!(
            sup.get(id).await.unwrap_err(),
            ControlError::Store(StoreError::NotFound(_))
        ));
        assert!(sup.start(id).await.is_err());
        assert!(sup.stop(id).await.is_err());
        assert!(sup.delete(id).await.is_err());
    }

    #[tokio::test]
    async fn empty_update_only_advances_updated_at() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();

        let updated = sup.update(spec.id, ConsumerPatch::default()).await.unwrap();
        assert_eq!(updated.topic, spec.topic);
        assert_eq!(updated.processors, spec.processors);
        assert!(updated.updated_at >= spec.updated_at);
    }

    #[tokio::test]
    async fn update_swaps_processors_on_an_active_consumer() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), true)).await.unwrap();

        let new_path = dir.path().join("replacement.log");
        let mut config = Map::new();
        config.insert(
            "file_path".into(),
            serde_json::Value::String(new_path.to_str().unwrap().into()),
        );
        let patch = ConsumerPatch {
            processors: Some(vec![ProcessorDraft {
                kind: "file_sink".into(),
                config,
            }]),
            ..Default::default()
        };

        let updated = sup.update(spec.id, patch).await.unwrap();
        assert_eq!(updated.status, ConsumerStatus::Active);
        assert_eq!(updated.processors.len(), 1);
        assert_ne!(updated.processors[0].id, spec.processors[0].id);
        assert_eq!(
            sup.extractor_status(spec.id).await,
            Some(ExtractorStatus::Running)
        );

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn update_with_unknown_type_leaves_the_spec_untouched() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();

        let patch = ConsumerPatch {
            topic: Some("changed".into()),
            processors: Some(vec![ProcessorDraft {
                kind: "nonexistent".into(),
                config: Map::new(),
            }]),
            ..Default::default()
        };
        assert!(sup.update(spec.id, patch).await.is_err());
        assert_eq!(sup.get(spec.id).await.unwrap().topic, "orders");
    }

    #[tokio::test]
    async fn update_of_connection_rebuilds_a_running_extractor() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), true)).await.unwrap();

        let patch = ConsumerPatch {
            topic: Some("other-topic".into()),
            ..Default::default()
        };
        let updated = sup.update(spec.id, patch).await.unwrap();
        assert_eq!(updated.topic, "other-topic");
        assert_eq!(updated.status, ConsumerStatus::Active);
        assert_eq!(
            sup.extractor_status(spec.id).await,
            Some(ExtractorStatus::Running)
        );

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn delete_an_active_consumer_removes_everything() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), true)).await.unwrap();

        sup.delete(spec.id).await.unwrap();
        assert_eq!(sup.registered_count().await, 0);
        assert!(sup.get(spec.id).await.is_err());
    }

    #[tokio::test]
    async fn known_groups_deduplicates() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        sup.create(file_sink_draft(dir.path(), false)).await.unwrap();
        sup.create(file_sink_draft(dir.path(), false)).await.unwrap();

        assert_eq!(sup.known_groups().await.unwrap(), ["orders-group"]);
    }

    #[tokio::test]
    async fn journal_records_mutations_newest_first() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let spec = sup.create(file_sink_draft(dir.path(), false)).await.unwrap();
        sup.start(spec.id).await.unwrap();
        sup.stop(spec.id).await.unwrap();

        let ops: Vec<OpKind> = sup
            .recent_operations(10)
            .into_iter()
            .map(|entry| entry.op)
            .collect();
        assert_eq!(ops, [OpKind::Stop, OpKind::Start, OpKind::Create]);
    }

    mod hanging {
        use crate::processor::{Processor, ProcessorError};
        use crate::record::SinkRecord;
        use async_trait::async_trait;
        use paimen_core::ControlError;
        use serde_json::{Map, Value};
        use std::time::Duration;
        use uuid::Uuid;

        /// Close never returns, so a stop can only end by timing out.
        #[derive(Debug)]
        pub struct HangingCloseProcessor {
            id: Uuid,
        }

        #[async_trait]
        impl Processor for HangingCloseProcessor {
            fn id(&self) -> Uuid {
                self.id
            }
            fn kind(&self) -> &str {
                "hanging"
            }
            async fn process(&self, _record: &SinkRecord) -> Result<(), ProcessorError> {
                Ok(())
            }
            async fn close(&self) -> Result<(), ProcessorError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        pub fn validate(_config: &Map<String, Value>) -> Result<(), ControlError> {
            Ok(())
        }

        pub fn build(
            id: Uuid,
            _config: &Map<String, Value>,
        ) -> Result<std::sync::Arc<dyn Processor>, ControlError> {
            Ok(std::sync::Arc::new(HangingCloseProcessor { id }))
        }
    }

    #[tokio::test]
    async fn stop_that_times_out_marks_the_spec_error_and_start_recovers_it() {
        let mut factory = ProcessorFactory::with_defaults();
        factory.register("hanging", hanging::build, hanging::validate);
        let sup = ConsumerSupervisor::new(
            Arc::new(MemoryStore::new()),
            Arc::new(factory),
            SupervisorSettings {
                poll_timeout: Duration::from_millis(50),
                stop_timeout: Duration::from_millis(200),
            },
        );

        let draft: ConsumerDraft = serde_json::from_value(serde_json::json!({
            "broker_host": "localhost",
            "broker_port": 9092,
            "topic": "t",
            "group_id": "g",
            "auto_start": true,
            "processors": [{"type": "hanging", "config": {}}]
        }))
        .unwrap();
        let spec = sup.create(draft).await.unwrap();

        let err = sup.stop(spec.id).await.unwrap_err();
        assert!(matches!(err, ControlError::TimedOut(_)));
        let errored = sup.get(spec.id).await.unwrap();
        assert_eq!(errored.status, ConsumerStatus::Error);
        assert!(errored.last_error.is_some());

        // Recovery path: swap to a well-behaved pipeline, then start.
        let patch = ConsumerPatch {
            processors: Some(vec![]),
            ..Default::default()
        };
        sup.update(spec.id, patch).await.unwrap();
        let started = sup.start(spec.id).await.unwrap();
        assert_eq!(started.status, ConsumerStatus::Active);
        let recovered = sup.get(spec.id).await.unwrap();
        assert_eq!(recovered.status, ConsumerStatus::Active);
        assert!(recovered.last_error.is_none());

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_every_running_consumer() {
        let sup = supervisor();
        let dir = tempfile::tempdir().unwrap();
        let a = sup.create(file_sink_draft(dir.path(), true)).await.unwrap();
        let b = sup.create(file_sink_draft(dir.path(), true)).await.unwrap();
        assert_eq!(sup.registered_count().await, 2);

        sup.shutdown().await;
        assert_eq!(sup.registered_count().await, 0);
        // Store status is not rewritten at shutdown; specs keep their last
        // operator-visible state.
        assert_eq!(sup.get(a.id).await.unwrap().status, ConsumerStatus::Active);
        assert_eq!(sup.get(b.id).await.unwrap().status, ConsumerStatus::Active);
    }
}
