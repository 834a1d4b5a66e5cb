//! Database sink (PostgreSQL/MySQL/SQLite with sqlx).

use async_trait::async_trait;
use sqlx::pool::PoolOptions;
use sqlx::AnyPool;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{Processor, ProcessorError};
use crate::record::SinkRecord;

const DEFAULT_TABLE: &str = "kafka_records";

/// Ensure default Any drivers are installed (idempotent).
fn ensure_drivers() {
    sqlx::any::install_default_drivers();
}

/// Inserts one row per record into a relational table.
///
/// The connection pool is opened lazily on the first record, so building the
/// processor never touches the network. Connection-level failures are
/// transient (retryable on the next record); statement failures are
/// permanent.
#[derive(Debug)]
pub struct DatabaseSync {
    id: Uuid,
    dsn: String,
    table: String,
    pool: OnceCell<AnyPool>,
}

impl DatabaseSync {
    pub fn new(id: Uuid, dsn: impl Into<String>, table: Option<String>) -> Self {
        Self {
            id,
            dsn: dsn.into(),
            table: table.unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            pool: OnceCell::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn pool(&self) -> Result<&AnyPool, ProcessorError> {
        self.pool
            .get_or_try_init(|| async {
                ensure_drivers();
                PoolOptions::<sqlx::Any>::new()
                    .max_connections(4)
                    .connect(&self.dsn)
                    .await
                    .map_err(|e| ProcessorError::Transient(e.to_string()))
            })
            .await
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl Processor for DatabaseSync {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> &str {
        "database_sync"
    }

    async fn process(&self, record: &SinkRecord) -> Result<(), ProcessorError> {
        let pool = self.pool().await?;

        // The Any driver does not translate bind placeholders across
        // backends, so the statement is rendered inline.
        let sql = format!(
            "INSERT INTO {} (topic, partition_id, record_offset, payload) \
             VALUES ('{}', {}, {}, '{}')",
            self.table,
            escape(&record.topic),
            record.partition,
            record.offset,
            escape(&record.render_line()),
        );

        sqlx::query(&sql).execute(pool).await.map_err(|e| match e {
            sqlx::Error::Database(db) => ProcessorError::Permanent(db.to_string()),
            other => ProcessorError::Transient(other.to_string()),
        })?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ProcessorError> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
        Ok(())
    }
}
