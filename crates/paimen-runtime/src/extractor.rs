//! One running consumer: a Kafka client, a poll task, a processor list.
//!
//! The extractor owns its `StreamConsumer` exclusively. A single cooperative
//! task polls with a bounded timeout and fans every record out to the
//! processor list in declared order; a cancellation flag is checked on every
//! iteration so `stop()` is observed within one poll timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::BorrowedMessage;
use rdkafka::Message;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::processor::Processor;
use crate::record::SinkRecord;

/// Transient poll errors tolerated back-to-back before the loop gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 25;

/// Connection identity and timeouts for one extractor.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub consumer_id: Uuid,
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub client_id: Option<String>,
    pub poll_timeout: Duration,
    pub stop_timeout: Duration,
}

/// Extractor-internal state machine. FAILED is terminal; the supervisor
/// discards a failed extractor and builds a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorStatus {
    Created,
    Running,
    Stopped,
    Failed(String),
}

/// Sent to the supervisor when a poll loop dies on a fatal error.
#[derive(Debug, Clone)]
pub struct ExtractorFailure {
    pub consumer_id: Uuid,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("kafka client init failed: {0}")]
    ClientInit(String),

    #[error("stop timed out after {0:?}")]
    StopTimedOut(Duration),

    #[error("extractor already failed: {0}")]
    Failed(String),
}

enum LoopExit {
    Cancelled,
    Fatal(String),
}

struct Inner {
    processors: Vec<Arc<dyn Processor>>,
    cancel: Option<Arc<AtomicBool>>,
    task: Option<JoinHandle<LoopExit>>,
}

/// A single supervised Kafka consumer.
pub struct MessageExtractor {
    config: ExtractorConfig,
    status: Arc<StdMutex<ExtractorStatus>>,
    inner: Mutex<Inner>,
    failure_tx: mpsc::UnboundedSender<ExtractorFailure>,
}

impl MessageExtractor {
    pub fn new(
        config: ExtractorConfig,
        processors: Vec<Arc<dyn Processor>>,
        failure_tx: mpsc::UnboundedSender<ExtractorFailure>,
    ) -> Self {
        Self {
            config,
            status: Arc::new(StdMutex::new(ExtractorStatus::Created)),
            inner: Mutex::new(Inner {
                processors,
                cancel: None,
                task: None,
            }),
            failure_tx,
        }
    }

    pub fn status(&self) -> ExtractorStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status(), ExtractorStatus::Running)
    }

    /// Spawn the poll task if it is not already running. Idempotent.
    pub async fn start(&self) -> Result<(), ExtractorError> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner)
    }

    /// Signal cancellation and wait for the poll task to drain, bounded by
    /// the stop timeout. Idempotent; stopping a never-started or already
    /// stopped extractor is a no-op.
    pub async fn stop(&self) -> Result<(), ExtractorError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    /// Swap the processor list, restarting the poll loop if it was running.
    /// Atomic from the caller's perspective: the internal lock is held for
    /// the whole stop/swap/start sequence.
    pub async fn replace_processors(
        &self,
        processors: Vec<Arc<dyn Processor>>,
    ) -> Result<(), ExtractorError> {
        let mut inner = self.inner.lock().await;
        let was_running = matches!(self.status(), ExtractorStatus::Running);

        self.stop_locked(&mut inner).await?;
        // The exiting loop already closed the old processors; closing again
        // covers the never-started case and is safe per the trait contract.
        for processor in &inner.processors {
            if let Err(e) = processor.close().await {
                warn!(
                    consumer_id = %self.config.consumer_id,
                    processor_id = %processor.id(),
                    error = %e,
                    "error closing replaced processor"
                );
            }
        }
        inner.processors = processors;

        if was_running {
            self.start_locked(&mut inner)?;
        }
        Ok(())
    }

    fn start_locked(&self, inner: &mut Inner) -> Result<(), ExtractorError> {
        match self.status() {
            ExtractorStatus::Running => return Ok(()),
            ExtractorStatus::Failed(reason) => return Err(ExtractorError::Failed(reason)),
            ExtractorStatus::Created | ExtractorStatus::Stopped => {}
        }

        let consumer = self.build_consumer()?;
        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| ExtractorError::ClientInit(e.to_string()))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(poll_loop(
            consumer,
            self.config.clone(),
            inner.processors.clone(),
            cancel.clone(),
            self.status.clone(),
            self.failure_tx.clone(),
        ));

        inner.cancel = Some(cancel);
        inner.task = Some(task);
        *self.status.lock().expect("status lock poisoned") = ExtractorStatus::Running;
        info!(
            consumer_id = %self.config.consumer_id,
            topic = %self.config.topic,
            group_id = %self.config.group_id,
            "extractor started"
        );
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<(), ExtractorError> {
        if let Some(cancel) = inner.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        let Some(task) = inner.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.stop_timeout, task).await {
            Ok(Ok(LoopExit::Cancelled)) => {
                *self.status.lock().expect("status lock poisoned") = ExtractorStatus::Stopped;
                info!(consumer_id = %self.config.consumer_id, "extractor stopped");
                Ok(())
            }
            Ok(Ok(LoopExit::Fatal(_))) => {
                // The loop already recorded the failure; stop itself is done.
                Ok(())
            }
            Ok(Err(join_err)) => {
                let reason = format!("poll task panicked: {join_err}");
                *self.status.lock().expect("status lock poisoned") =
                    ExtractorStatus::Failed(reason.clone());
                Err(ExtractorError::Failed(reason))
            }
            Err(_) => {
                // Task did not drain in time: abandon it.
                let reason = format!(
                    "stop timed out after {:?}",
                    self.config.stop_timeout
                );
                *self.status.lock().expect("status lock poisoned") =
                    ExtractorStatus::Failed(reason);
                error!(
                    consumer_id = %self.config.consumer_id,
                    timeout = ?self.config.stop_timeout,
                    "poll task did not stop in time; abandoning it"
                );
                Err(ExtractorError::StopTimedOut(self.config.stop_timeout))
            }
        }
    }

    fn build_consumer(&self) -> Result<StreamConsumer, ExtractorError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false");
        if let Some(client_id) = &self.config.client_id {
            client_config.set("client.id", client_id);
        }

        client_config
            .create()
            .map_err(|e| ExtractorError::ClientInit(e.to_string()))
    }
}

async fn poll_loop(
    consumer: StreamConsumer,
    config: ExtractorConfig,
    processors: Vec<Arc<dyn Processor>>,
    cancel: Arc<AtomicBool>,
    status: Arc<StdMutex<ExtractorStatus>>,
    failure_tx: mpsc::UnboundedSender<ExtractorFailure>,
) -> LoopExit {
    let mut stream = consumer.stream();
    let mut consecutive_errors: u32 = 0;

    let exit = loop {
        if cancel.load(Ordering::SeqCst) {
            break LoopExit::Cancelled;
        }

        match tokio::time::timeout(config.poll_timeout, stream.next()).await {
            Ok(Some(Ok(msg))) => {
                consecutive_errors = 0;
                let record = record_from_message(&msg);
                dispatch(&config, &processors, &record).await;
            }
            Ok(Some(Err(e))) => {
                if is_fatal(&e) {
                    break LoopExit::Fatal(e.to_string());
                }
                consecutive_errors += 1;
                if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                    break LoopExit::Fatal(format!(
                        "{} consecutive poll errors, last: {e}",
                        consecutive_errors
                    ));
                }
                let backoff = Duration::from_millis(100 * 2u64.pow(consecutive_errors.min(7)));
                warn!(
                    consumer_id = %config.consumer_id,
                    error = %e,
                    backoff = ?backoff,
                    "transient poll error"
                );
                tokio::time::sleep(backoff).await;
            }
            Ok(None) => break LoopExit::Cancelled,
            Err(_) => {} // poll timeout; re-check cancellation
        }
    };

    for processor in &processors {
        if let Err(e) = processor.close().await {
            warn!(
                consumer_id = %config.consumer_id,
                processor_id = %processor.id(),
                error = %e,
                "error closing processor"
            );
        }
    }
    drop(stream);

    if let LoopExit::Fatal(reason) = &exit {
        *status.lock().expect("status lock poisoned") = ExtractorStatus::Failed(reason.clone());
        error!(
            consumer_id = %config.consumer_id,
            reason = %reason,
            "extractor poll loop failed"
        );
        let _ = failure_tx.send(ExtractorFailure {
            consumer_id: config.consumer_id,
            reason: reason.clone(),
        });
    }
    exit
}

/// Invoke every processor for one record, in declared order. A failure in
/// one processor never skips its peers and never stops the loop.
async fn dispatch(config: &ExtractorConfig, processors: &[Arc<dyn Processor>], record: &SinkRecord) {
    for processor in processors {
        if let Err(e) = processor.process(record).await {
            warn!(
                consumer_id = %config.consumer_id,
                processor_id = %processor.id(),
                processor_kind = processor.kind(),
                offset = record.offset,
                partition = record.partition,
                error = %e,
                "processor failed for record"
            );
        }
    }
}

fn record_from_message(msg: &BorrowedMessage<'_>) -> SinkRecord {
    SinkRecord {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        value: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
        timestamp: msg
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

fn is_fatal(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::SaslAuthenticationFailed
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
                | RDKafkaErrorCode::ClusterAuthorizationFailed
                | RDKafkaErrorCode::Fatal
        )
    )
}
