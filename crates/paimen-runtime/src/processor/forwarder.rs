//! HTTP forwarder sink with a bounded retry budget.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Method;
use uuid::Uuid;

use super::{Processor, ProcessorError};
use crate::record::SinkRecord;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Forwards each record's payload to an HTTP endpoint.
///
/// Non-2xx responses and transport errors are retried with linear backoff
/// until the retry budget is exhausted, then reported as transient.
#[derive(Debug)]
pub struct StreamingForwarder {
    id: Uuid,
    url: String,
    method: Method,
    headers: IndexMap<String, String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl StreamingForwarder {
    pub fn new(id: Uuid, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            method: Method::POST,
            headers: IndexMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn send_once(&self, record: &SinkRecord) -> Result<(), String> {
        let mut req = self
            .client
            .request(self.method.clone(), &self.url)
            .header("Content-Type", "application/json")
            .body(record.value.clone());
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("endpoint returned {}", resp.status())),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl Processor for StreamingForwarder {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> &str {
        "streaming_forwarder"
    }

    async fn process(&self, record: &SinkRecord) -> Result<(), ProcessorError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            match self.send_once(record).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
            if attempt < self.max_retries {
                tokio::time::sleep(RETRY_BASE_DELAY * (attempt + 1)).await;
            }
        }
        Err(ProcessorError::Transient(format!(
            "forwarding to {} failed after {} attempts: {}",
            self.url,
            self.max_retries + 1,
            last_error
        )))
    }

    async fn close(&self) -> Result<(), ProcessorError> {
        Ok(())
    }
}
