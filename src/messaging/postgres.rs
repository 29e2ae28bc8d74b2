//! PostgreSQL LISTEN/NOTIFY transport.

use super::supervise::{connect_within, supervise, Session};
use super::traits::{IncomingMessageConsumer, Messenger, MessengerContext, MessengerProvider};
use crate::error::{PermweaveError, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct PostgresMessenger {
    pool: PgPool,
    channel: String,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresMessenger {
    pub fn start(pool: PgPool, channel: &str, context: MessengerContext) -> Arc<Self> {
        let retry = Duration::from_millis(context.config.reconnect_interval_ms);
        let limit = Duration::from_millis(context.config.connect_timeout_ms);
        let listener = {
            let pool = pool.clone();
            let channel = channel.to_string();
            let consumer = context.consumer.clone();
            let cancel = context.cancel.clone();
            let metrics = context.metrics.clone();
            tokio::spawn(async move {
                supervise("postgres", retry, cancel, metrics, move |session| {
                    listen_session(pool.clone(), channel.clone(), consumer.clone(), limit, session)
                })
                .await
            })
        };

        Arc::new(Self {
            pool,
            channel: channel.to_string(),
            cancel: context.cancel,
            listener: Mutex::new(Some(listener)),
        })
    }
}

async fn listen_session(
    pool: PgPool,
    channel: String,
    consumer: Arc<dyn IncomingMessageConsumer>,
    limit: Duration,
    mut session: Session,
) -> Result<()> {
    let mut listener = connect_within("postgres", limit, async {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(&channel).await?;
        Ok::<_, PermweaveError>(listener)
    })
    .await?;
    session.connected();

    loop {
        let notification = listener.recv().await?;
        consumer.consume_incoming_message_as_string(notification.payload());
    }
}

#[async_trait]
impl Messenger for PostgresMessenger {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn send_outgoing_message(&self, encoded: &str) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(encoded)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!(transport = "postgres", error = %e, "Messenger listener ended abnormally");
            }
        }
        self.pool.close().await;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PostgresMessengerProvider;

#[async_trait]
impl MessengerProvider for PostgresMessengerProvider {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn obtain(&self, context: MessengerContext) -> Result<Arc<dyn Messenger>> {
        let settings = context.config.postgres.clone();
        let limit = Duration::from_millis(context.config.connect_timeout_ms);
        let pool = connect_within("postgres", limit, async {
            Ok::<_, PermweaveError>(
                PgPoolOptions::new()
                    .max_connections(2)
                    .acquire_timeout(limit)
                    .connect(&settings.url)
                    .await?,
            )
        })
        .await?;
        Ok(PostgresMessenger::start(pool, &settings.channel, context))
    }
}
