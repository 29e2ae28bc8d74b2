//! Redis pub/sub transport.

use super::supervise::{connect_within, supervise, Session};
use super::traits::{IncomingMessageConsumer, Messenger, MessengerContext, MessengerProvider};
use crate::error::{PermweaveError, Result};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

fn transport_error(e: redis::RedisError) -> PermweaveError {
    PermweaveError::Transport(format!("redis: {}", e))
}

pub struct RedisMessenger {
    client: redis::Client,
    channel: String,
    connect_timeout: Duration,
    publisher: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisMessenger {
    pub fn start(client: redis::Client, channel: &str, context: MessengerContext) -> Arc<Self> {
        let retry = Duration::from_millis(context.config.reconnect_interval_ms);
        let limit = Duration::from_millis(context.config.connect_timeout_ms);
        let listener = {
            let client = client.clone();
            let channel = channel.to_string();
            let consumer = context.consumer.clone();
            let cancel = context.cancel.clone();
            let metrics = context.metrics.clone();
            tokio::spawn(async move {
                supervise("redis", retry, cancel, metrics, move |session| {
                    subscribe_session(client.clone(), channel.clone(), consumer.clone(), limit, session)
                })
                .await
            })
        };

        Arc::new(Self {
            client,
            channel: channel.to_string(),
            connect_timeout: limit,
            publisher: tokio::sync::Mutex::new(None),
            cancel: context.cancel,
            listener: Mutex::new(Some(listener)),
        })
    }
}

async fn subscribe_session(
    client: redis::Client,
    channel: String,
    consumer: Arc<dyn IncomingMessageConsumer>,
    limit: Duration,
    mut session: Session,
) -> Result<()> {
    let mut pubsub = connect_within("redis", limit, async {
        let mut pubsub = client.get_async_pubsub().await.map_err(transport_error)?;
        pubsub.subscribe(&channel).await.map_err(transport_error)?;
        Ok::<_, PermweaveError>(pubsub)
    })
    .await?;
    session.connected();

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = message.get_payload().map_err(transport_error)?;
        consumer.consume_incoming_message_as_string(&payload);
    }
    Err(PermweaveError::Transport(
        "redis subscription stream ended".to_string(),
    ))
}

#[async_trait]
impl Messenger for RedisMessenger {
    fn name(&self) -> &str {
        "redis"
    }

    async fn send_outgoing_message(&self, encoded: &str) -> Result<()> {
        let mut publisher = self.publisher.lock().await;
        if publisher.is_none() {
            let connection = connect_within("redis", self.connect_timeout, async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(transport_error)
            })
            .await?;
            *publisher = Some(connection);
        }

        let Some(connection) = publisher.as_mut() else {
            return Err(PermweaveError::MessengerClosed);
        };
        let sent: redis::RedisResult<()> = connection.publish(&self.channel, encoded).await;
        if let Err(e) = sent {
            // reconnect on the next send
            *publisher = None;
            return Err(transport_error(e));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!(transport = "redis", error = %e, "Messenger listener ended abnormally");
            }
        }
        self.publisher.lock().await.take();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RedisMessengerProvider;

#[async_trait]
impl MessengerProvider for RedisMessengerProvider {
    fn name(&self) -> &str {
        "redis"
    }

    async fn obtain(&self, context: MessengerContext) -> Result<Arc<dyn Messenger>> {
        let settings = context.config.redis.clone();
        let client = redis::Client::open(settings.url.as_str()).map_err(transport_error)?;
        Ok(RedisMessenger::start(client, &settings.channel, context))
    }
}
