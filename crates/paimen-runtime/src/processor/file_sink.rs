//! File sink - appends one line per record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Processor, ProcessorError};
use crate::record::SinkRecord;

/// Appends each record's payload as one line to a local file.
///
/// The parent directory is created on construction if absent. Writes are
/// flushed per record.
#[derive(Debug)]
pub struct FileSink {
    id: Uuid,
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn new(id: Uuid, path: impl Into<PathBuf>) -> Result<Self, ProcessorError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl Processor for FileSink {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> &str {
        "file_sink"
    }

    async fn process(&self, record: &SinkRecord) -> Result<(), ProcessorError> {
        let mut file = self.file.lock().await;
        writeln!(file, "{}", record.render_line())?;
        file.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ProcessorError> {
        let mut file = self.file.lock().await;
        file.flush()?;
        Ok(())
    }
}
