//! RabbitMQ transport over a non-durable topic exchange. Each process binds
//! its own exclusive queue to the configured routing key.

use super::supervise::{connect_within, supervise, Session};
use super::traits::{IncomingMessageConsumer, Messenger, MessengerContext, MessengerProvider};
use crate::config::RabbitMqMessengerConfig;
use crate::error::{PermweaveError, Result};

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

fn transport_error(e: lapin::Error) -> PermweaveError {
    PermweaveError::Transport(format!("rabbitmq: {}", e))
}

async fn open_channel(settings: &RabbitMqMessengerConfig) -> Result<(Connection, Channel)> {
    let connection = Connection::connect(&settings.uri, ConnectionProperties::default())
        .await
        .map_err(transport_error)?;
    let channel = connection.create_channel().await.map_err(transport_error)?;
    channel
        .exchange_declare(
            &settings.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(transport_error)?;
    Ok((connection, channel))
}

pub struct RabbitMqMessenger {
    settings: RabbitMqMessengerConfig,
    connect_timeout: Duration,
    publisher: tokio::sync::Mutex<Option<(Connection, Channel)>>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RabbitMqMessenger {
    pub fn start(settings: RabbitMqMessengerConfig, context: MessengerContext) -> Arc<Self> {
        let retry = Duration::from_millis(context.config.reconnect_interval_ms);
        let limit = Duration::from_millis(context.config.connect_timeout_ms);
        let listener = {
            let settings = settings.clone();
            let consumer = context.consumer.clone();
            let cancel = context.cancel.clone();
            let metrics = context.metrics.clone();
            tokio::spawn(async move {
                supervise("rabbitmq", retry, cancel, metrics, move |session| {
                    consume_session(settings.clone(), consumer.clone(), limit, session)
                })
                .await
            })
        };

        Arc::new(Self {
            settings,
            connect_timeout: limit,
            publisher: tokio::sync::Mutex::new(None),
            cancel: context.cancel,
            listener: Mutex::new(Some(listener)),
        })
    }
}

async fn consume_session(
    settings: RabbitMqMessengerConfig,
    consumer: Arc<dyn IncomingMessageConsumer>,
    limit: Duration,
    mut session: Session,
) -> Result<()> {
    let (_connection, channel) = connect_within("rabbitmq", limit, open_channel(&settings)).await?;
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(transport_error)?;
    channel
        .queue_bind(
            queue.name().as_str(),
            &settings.exchange,
            &settings.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(transport_error)?;

    let mut deliveries = channel
        .basic_consume(
            queue.name().as_str(),
            "",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(transport_error)?;
    session.connected();

    while let Some(delivery) = deliveries.next().await {
        let delivery = delivery.map_err(transport_error)?;
        let payload = String::from_utf8_lossy(&delivery.data).into_owned();
        consumer.consume_incoming_message_as_string(&payload);
        delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(transport_error)?;
    }
    Err(PermweaveError::Transport(
        "rabbitmq consumer stream ended".to_string(),
    ))
}

#[async_trait]
impl Messenger for RabbitMqMessenger {
    fn name(&self) -> &str {
        "rabbitmq"
    }

    async fn send_outgoing_message(&self, encoded: &str) -> Result<()> {
        let mut publisher = self.publisher.lock().await;
        let connected = matches!(publisher.as_ref(), Some((connection, _)) if connection.status().connected());
        if !connected {
            *publisher = Some(connect_within("rabbitmq", self.connect_timeout, open_channel(&self.settings)).await?);
        }

        let Some((_, channel)) = publisher.as_ref() else {
            return Err(PermweaveError::MessengerClosed);
        };
        channel
            .basic_publish(
                &self.settings.exchange,
                &self.settings.routing_key,
                BasicPublishOptions::default(),
                encoded.as_bytes(),
                BasicProperties::default(),
            )
            .await
            .map_err(transport_error)?
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!(transport = "rabbitmq", error = %e, "Messenger listener ended abnormally");
            }
        }
        if let Some((connection, _)) = self.publisher.lock().await.take() {
            connection
                .close(200, "closing")
                .await
                .map_err(transport_error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RabbitMqMessengerProvider;

#[async_trait]
impl MessengerProvider for RabbitMqMessengerProvider {
    fn name(&self) -> &str {
        "rabbitmq"
    }

    async fn obtain(&self, context: MessengerContext) -> Result<Arc<dyn Messenger>> {
        let settings = context.config.rabbitmq.clone();
        Ok(RabbitMqMessenger::start(settings, context))
    }
}
