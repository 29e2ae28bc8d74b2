use super::traits::{IncomingMessageConsumer, Messenger, MessengerContext, MessengerProvider};
use crate::Result;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// In-process broadcast channel shared by every engine that should see each
/// other's messages. Senders also receive their own messages.
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<String>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, encoded: &str) -> usize {
        self.sender.send(encoded.to_string()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LocalMessenger {
    bus: LocalBus,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LocalMessenger {
    pub fn start(
        bus: LocalBus,
        consumer: Arc<dyn IncomingMessageConsumer>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let receiver = bus.subscribe();
        let listener = tokio::spawn(listen(receiver, consumer, cancel.clone()));
        Arc::new(Self {
            bus,
            cancel,
            listener: Mutex::new(Some(listener)),
        })
    }
}

async fn listen(
    mut receiver: broadcast::Receiver<String>,
    consumer: Arc<dyn IncomingMessageConsumer>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => received,
        };
        match received {
            Ok(encoded) => {
                consumer.consume_incoming_message_as_string(&encoded);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Local messenger lagged behind, messages were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Local messenger listener stopped");
}

#[async_trait]
impl Messenger for LocalMessenger {
    fn name(&self) -> &str {
        "local"
    }

    async fn send_outgoing_message(&self, encoded: &str) -> Result<()> {
        let delivered = self.bus.publish(encoded);
        debug!(delivered, "Published local message");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!(transport = "local", error = %e, "Messenger listener ended abnormally");
            }
        }
        Ok(())
    }
}

/// Hands out messengers attached to one shared [`LocalBus`].
#[derive(Debug, Clone, Default)]
pub struct LocalMessengerProvider {
    bus: LocalBus,
}

impl LocalMessengerProvider {
    pub fn new(bus: LocalBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }
}

#[async_trait]
impl MessengerProvider for LocalMessengerProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn obtain(&self, context: MessengerContext) -> Result<Arc<dyn Messenger>> {
        Ok(LocalMessenger::start(
            self.bus.clone(),
            context.consumer,
            context.cancel,
        ))
    }
}
