//! Polling-table transport.
//!
//! Messages are rows `(id, time, msg)` in a shared table. Every process
//! remembers the highest id it has seen and polls for newer rows; old rows
//! are deleted periodically.

use super::supervise::{connect_within, supervise, Session};
use super::traits::{IncomingMessageConsumer, Messenger, MessengerContext, MessengerProvider};
use crate::config::SqlMessengerConfig;
use crate::error::{PermweaveError, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The storage operations the polling transport needs.
#[async_trait]
pub trait MessageTable: Send + Sync {
    async fn ensure_schema(&self) -> Result<()>;

    async fn insert(&self, message: &str, time_ms: i64) -> Result<()>;

    /// Highest id currently stored, zero when empty.
    async fn max_id(&self) -> Result<i64>;

    /// Rows with `id > after_id` and `time >= since_ms`, in id order.
    async fn poll(&self, after_id: i64, since_ms: i64) -> Result<Vec<(i64, String)>>;

    /// Deletes rows older than `before_ms`, returning how many went.
    async fn cleanup(&self, before_ms: i64) -> Result<u64>;
}

pub struct SqliteMessageTable {
    pool: SqlitePool,
    table: String,
}

impl SqliteMessageTable {
    pub async fn connect(url: &str, table: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::from_pool(pool, table)
    }

    pub fn from_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(PermweaveError::InvalidConfig(format!(
                "invalid message table name '{}'",
                table
            )));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl MessageTable for SqliteMessageTable {
    async fn ensure_schema(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             time INTEGER NOT NULL, \
             msg TEXT NOT NULL)",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert(&self, message: &str, time_ms: i64) -> Result<()> {
        let sql = format!("INSERT INTO {} (time, msg) VALUES (?, ?)", self.table);
        sqlx::query(&sql)
            .bind(time_ms)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn max_id(&self) -> Result<i64> {
        let sql = format!("SELECT COALESCE(MAX(id), 0) FROM {}", self.table);
        let id = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn poll(&self, after_id: i64, since_ms: i64) -> Result<Vec<(i64, String)>> {
        let sql = format!(
            "SELECT id, msg FROM {} WHERE id > ? AND time >= ? ORDER BY id",
            self.table
        );
        let rows = sqlx::query_as::<_, (i64, String)>(&sql)
            .bind(after_id)
            .bind(since_ms)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn cleanup(&self, before_ms: i64) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE time < ?", self.table);
        let result = sqlx::query(&sql)
            .bind(before_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct SqlMessenger {
    table: Arc<dyn MessageTable>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SqlMessenger {
    /// Prepares the table and starts the poll and cleanup loops.
    pub async fn start(
        table: Arc<dyn MessageTable>,
        settings: &SqlMessengerConfig,
        context: MessengerContext,
    ) -> Result<Arc<Self>> {
        table.ensure_schema().await?;
        let last_id = Arc::new(AtomicI64::new(table.max_id().await?));

        let poll_interval = Duration::from_millis(settings.poll_interval_ms);
        let retention_ms = settings.retention_ms as i64;
        let retry = Duration::from_millis(context.config.reconnect_interval_ms);
        let metrics = context.metrics.clone();

        let poller = {
            let table = table.clone();
            let consumer = context.consumer.clone();
            let cancel = context.cancel.clone();
            tokio::spawn(async move {
                supervise("sql", retry, cancel, metrics, move |session| {
                    poll_session(
                        table.clone(),
                        consumer.clone(),
                        last_id.clone(),
                        poll_interval,
                        retention_ms,
                        session,
                    )
                })
                .await
            })
        };

        let cleaner = tokio::spawn(cleanup_loop(
            table.clone(),
            Duration::from_millis(settings.cleanup_interval_ms),
            retention_ms,
            context.cancel.clone(),
        ));

        Ok(Arc::new(Self {
            table,
            cancel: context.cancel,
            tasks: Mutex::new(vec![poller, cleaner]),
        }))
    }
}

async fn poll_session(
    table: Arc<dyn MessageTable>,
    consumer: Arc<dyn IncomingMessageConsumer>,
    last_id: Arc<AtomicI64>,
    poll_interval: Duration,
    retention_ms: i64,
    mut session: Session,
) -> Result<()> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let after = last_id.load(Ordering::Acquire);
        let rows = table.poll(after, now_ms() - retention_ms).await?;
        session.connected();

        for (id, msg) in rows {
            last_id.fetch_max(id, Ordering::AcqRel);
            consumer.consume_incoming_message_as_string(&msg);
        }
    }
}

async fn cleanup_loop(
    table: Arc<dyn MessageTable>,
    every: Duration,
    retention_ms: i64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        match table.cleanup(now_ms() - retention_ms).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Cleaned up old messenger rows"),
            Err(e) => warn!(error = %e, "Failed to clean up messenger table"),
        }
    }
}

#[async_trait]
impl Messenger for SqlMessenger {
    fn name(&self) -> &str {
        "sql"
    }

    async fn send_outgoing_message(&self, encoded: &str) -> Result<()> {
        self.table.insert(encoded, now_ms()).await
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(transport = "sql", error = %e, "Messenger task ended abnormally");
            }
        }
        Ok(())
    }
}

/// Connects to the table named in `messaging.sql`.
#[derive(Debug, Default)]
pub struct SqlMessengerProvider;

#[async_trait]
impl MessengerProvider for SqlMessengerProvider {
    fn name(&self) -> &str {
        "sql"
    }

    async fn obtain(&self, context: MessengerContext) -> Result<Arc<dyn Messenger>> {
        let settings = context.config.sql.clone();
        let limit = Duration::from_millis(context.config.connect_timeout_ms);
        let messenger = connect_within("sql", limit, async {
            let table = SqliteMessageTable::connect(
                &settings.url,
                &settings.table,
                settings.max_connections,
            )
            .await?;
            SqlMessenger::start(Arc::new(table), &settings, context).await
        })
        .await?;
        Ok(messenger)
    }
}
