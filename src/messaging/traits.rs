use super::message::ActionLogEntry;
use crate::config::MessagingConfig;
use crate::metrics::Metrics;
use crate::Result;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A connected transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    fn name(&self) -> &str;

    /// Publishes an encoded envelope. Delivery is best effort.
    async fn send_outgoing_message(&self, encoded: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Receives raw messages from a transport's listener.
///
/// Called on the listener task, so implementations must return quickly and
/// hand anything expensive off to another task.
pub trait IncomingMessageConsumer: Send + Sync {
    /// Returns whether the message was accepted, i.e. well formed and not
    /// seen before.
    fn consume_incoming_message_as_string(&self, encoded: &str) -> bool;
}

/// Everything a provider needs to bring up a transport.
#[derive(Clone)]
pub struct MessengerContext {
    pub consumer: Arc<dyn IncomingMessageConsumer>,
    pub config: MessagingConfig,
    /// Cancelled when the messaging service shuts down.
    pub cancel: CancellationToken,
    pub metrics: Option<Arc<Metrics>>,
}

/// Creates messengers of one transport kind.
#[async_trait]
pub trait MessengerProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn obtain(&self, context: MessengerContext) -> Result<Arc<dyn Messenger>>;
}

/// Acts on accepted messages.
#[async_trait]
pub trait IncomingMessageHandler: Send + Sync {
    async fn on_update_request(&self);

    async fn on_user_update(&self, uuid: Uuid);

    async fn on_log_entry(&self, entry: ActionLogEntry);
}

/// Listener for one custom channel. Called on a blocking thread, never on
/// the transport listener.
pub trait CustomMessageListener: Send + Sync {
    fn on_message(&self, channel_id: &str, payload: &str);
}
