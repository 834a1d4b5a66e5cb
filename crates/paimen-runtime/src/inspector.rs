//! On-demand consumer group inspection: group listings, committed offsets
//! and per-partition lag.
//!
//! Every call builds its own short-lived client and never touches the
//! clients owned by running extractors, so inspection can run concurrently
//! with any number of control operations. Queries either return the full
//! answer within the configured bound or fail; partial results are never
//! returned.

use std::collections::BTreeMap;
use std::time::Duration;

use paimen_core::ControlError;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use tracing::debug;

/// Committed offset of one partition, as reported for a consumer group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub current_offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// All committed offsets of one consumer group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupOffsets {
    pub group_id: String,
    pub offsets: Vec<PartitionOffset>,
}

impl GroupOffsets {
    /// Nested `{topic → {partition → offset}}` view.
    pub fn by_topic(&self) -> BTreeMap<String, BTreeMap<i32, i64>> {
        let mut out: BTreeMap<String, BTreeMap<i32, i64>> = BTreeMap::new();
        for entry in &self.offsets {
            out.entry(entry.topic.clone())
                .or_default()
                .insert(entry.partition, entry.current_offset);
        }
        out
    }
}

/// Lag of one partition. `current_offset` is −1 when the group has no
/// committed offset for the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionLag {
    pub current_offset: i64,
    pub log_end_offset: i64,
    pub lag: i64,
}

impl PartitionLag {
    /// `lag = max(0, end − current)`, with no committed offset counting as
    /// the full log.
    pub fn compute(current_offset: i64, log_end_offset: i64) -> Self {
        let lag = if current_offset < 0 {
            log_end_offset
        } else {
            (log_end_offset - current_offset).max(0)
        };
        Self {
            current_offset,
            log_end_offset,
            lag,
        }
    }
}

/// Read-only admin-query component for offsets and lag.
#[derive(Debug, Clone)]
pub struct LagInspector {
    default_bootstrap: String,
    timeout: Duration,
}

impl LagInspector {
    pub fn new(default_bootstrap: impl Into<String>, timeout: Duration) -> Self {
        Self {
            default_bootstrap: default_bootstrap.into(),
            timeout,
        }
    }

    pub fn default_bootstrap(&self) -> &str {
        &self.default_bootstrap
    }

    /// All consumer group ids the cluster reports, sorted and deduplicated.
    pub async fn list_groups(
        &self,
        bootstrap: Option<&str>,
    ) -> Result<Vec<String>, ControlError> {
        let bootstrap = self.resolve(bootstrap);
        let timeout = self.timeout;

        self.bounded("list_groups", move || {
            let consumer = admin_consumer(&bootstrap, "paimen-inspector")?;
            let groups = consumer
                .fetch_group_list(None, timeout)
                .map_err(query_error)?;
            let mut ids: Vec<String> = groups
                .groups()
                .iter()
                .map(|group| group.name().to_string())
                .collect();
            ids.sort_unstable();
            ids.dedup();
            Ok(ids)
        })
        .await
    }

    /// Committed offsets for `group_id` across every topic the cluster
    /// knows. NotFound when the group has no committed offsets at all.
    pub async fn committed_offsets(
        &self,
        group_id: &str,
        bootstrap: Option<&str>,
    ) -> Result<GroupOffsets, ControlError> {
        let bootstrap = self.resolve(bootstrap);
        let group = group_id.to_string();
        let timeout = self.timeout;

        self.bounded("committed_offsets", move || {
            let consumer = admin_consumer(&bootstrap, &group)?;
            let metadata = consumer.fetch_metadata(None, timeout).map_err(query_error)?;

            let mut wanted = TopicPartitionList::new();
            for topic in metadata.topics() {
                // Internal topics never carry operator offsets.
                if topic.name().starts_with("__") {
                    continue;
                }
                for partition in topic.partitions() {
                    wanted.add_partition(topic.name(), partition.id());
                }
            }

            let committed = consumer
                .committed_offsets(wanted, timeout)
                .map_err(query_error)?;

            let mut offsets: Vec<PartitionOffset> = committed
                .elements()
                .iter()
                .filter_map(|element| {
                    // Offsets other than a concrete position mean "nothing
                    // committed" for this partition.
                    let Offset::Offset(offset) = element.offset() else {
                        return None;
                    };
                    Some(PartitionOffset {
                        topic: element.topic().to_string(),
                        partition: element.partition(),
                        current_offset: offset,
                        metadata: Some(element.metadata().to_string())
                            .filter(|metadata| !metadata.is_empty()),
                    })
                })
                .collect();

            if offsets.is_empty() {
                return Err(ControlError::NotFound(format!(
                    "consumer group '{group}' has no committed offsets"
                )));
            }
            offsets.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));

            Ok(GroupOffsets {
                group_id: group.clone(),
                offsets,
            })
        })
        .await
    }

    /// Per-partition lag of `group_id` on `topic`.
    pub async fn lag(
        &self,
        group_id: &str,
        topic: &str,
        bootstrap: Option<&str>,
    ) -> Result<BTreeMap<i32, PartitionLag>, ControlError> {
        let bootstrap = self.resolve(bootstrap);
        let group = group_id.to_string();
        let topic = topic.to_string();
        let timeout = self.timeout;

        self.bounded("lag", move || {
            let consumer = admin_consumer(&bootstrap, &group)?;
            let metadata = consumer
                .fetch_metadata(Some(&topic), timeout)
                .map_err(query_error)?;

            let partitions: Vec<i32> = metadata
                .topics()
                .iter()
                .find(|entry| entry.name() == topic)
                .map(|entry| entry.partitions().iter().map(|p| p.id()).collect())
                .unwrap_or_default();
            if partitions.is_empty() {
                return Err(ControlError::NotFound(format!(
                    "topic '{topic}' has no partitions"
                )));
            }

            let mut wanted = TopicPartitionList::new();
            for partition in &partitions {
                wanted.add_partition(&topic, *partition);
            }
            let committed = consumer
                .committed_offsets(wanted, timeout)
                .map_err(query_error)?;

            let mut lags = BTreeMap::new();
            for partition in partitions {
                let (_, high) = consumer
                    .fetch_watermarks(&topic, partition, timeout)
                    .map_err(query_error)?;
                let current = match committed.find_partition(&topic, partition) {
                    Some(element) => match element.offset() {
                        Offset::Offset(offset) => offset,
                        _ => -1,
                    },
                    None => -1,
                };
                lags.insert(partition, PartitionLag::compute(current, high));
            }
            Ok(lags)
        })
        .await
    }

    fn resolve(&self, bootstrap: Option<&str>) -> String {
        bootstrap
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.default_bootstrap)
            .to_string()
    }

    /// Run a blocking admin query with the overall timeout applied. The
    /// blocking task is abandoned on timeout; it drops its client when the
    /// underlying call eventually returns.
    async fn bounded<T: Send + 'static>(
        &self,
        what: &'static str,
        query: impl FnOnce() -> Result<T, ControlError> + Send + 'static,
    ) -> Result<T, ControlError> {
        debug!(query = what, timeout = ?self.timeout, "running inspector query");
        // Grace on top of the rdkafka-level timeout so the inner call can
        // report its own, more specific error first.
        let bound = self.timeout + Duration::from_millis(500);
        match tokio::time::timeout(bound, tokio::task::spawn_blocking(query)).await {
            Err(_) => Err(ControlError::TimedOut(format!(
                "inspector {what} query exceeded {:?}",
                self.timeout
            ))),
            Ok(Err(join_err)) => Err(ControlError::ClientInit(format!(
                "inspector {what} query aborted: {join_err}"
            ))),
            Ok(Ok(result)) => result,
        }
    }
}

fn admin_consumer(bootstrap: &str, group_id: &str) -> Result<BaseConsumer, ControlError> {
    ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .create()
        .map_err(|e| ControlError::ClientInit(e.to_string()))
}

fn query_error(err: KafkaError) -> ControlError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::OperationTimedOut) => ControlError::TimedOut(err.to_string()),
        _ => ControlError::ClientInit(err.to_string()),
    }
}
