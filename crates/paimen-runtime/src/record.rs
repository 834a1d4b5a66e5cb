//! The record shape handed to downstream processors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One consumed Kafka record, detached from the client that polled it.
///
/// Processors never see the underlying rdkafka message; the extractor copies
/// the fields out so processor lifetimes are independent of poll batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SinkRecord {
    /// The payload as one line of text, for line-oriented sinks. Invalid
    /// UTF-8 is replaced rather than rejected; sinks are not a validation
    /// layer.
    pub fn render_line(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}
