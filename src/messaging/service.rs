use super::buffer::BufferedRequest;
use super::message::{ActionLogEntry, Message, RawEnvelope};
use super::recent::RecentIds;
use super::traits::{
    CustomMessageListener, IncomingMessageConsumer, IncomingMessageHandler, Messenger,
    MessengerContext, MessengerProvider,
};
use crate::config::MessagingConfig;
use crate::error::{PermweaveError, Result};
use crate::metrics::Metrics;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owns the active messenger and turns incoming envelopes into handler calls.
///
/// Ids of sent messages are recorded before sending, so a transport that
/// echoes a message back to its sender is harmless.
pub struct MessagingService {
    provider_name: String,
    messenger: RwLock<Option<Arc<dyn Messenger>>>,
    handler: Arc<dyn IncomingMessageHandler>,
    received: RecentIds,
    custom_listeners: RwLock<HashMap<String, Vec<Arc<dyn CustomMessageListener>>>>,
    push_buffer: BufferedRequest,
    sync_buffer: BufferedRequest,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
}

impl MessagingService {
    /// Creates the service and asks `provider` for a connected messenger.
    pub async fn connect(
        provider: Arc<dyn MessengerProvider>,
        handler: Arc<dyn IncomingMessageHandler>,
        config: &MessagingConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Arc<Self>> {
        let buffer_delay = Duration::from_millis(config.update_buffer_ms);
        let service = Arc::new(Self {
            provider_name: provider.name().to_string(),
            messenger: RwLock::new(None),
            handler,
            received: RecentIds::new(config.dedup_window),
            custom_listeners: RwLock::new(HashMap::new()),
            push_buffer: BufferedRequest::new(buffer_delay),
            sync_buffer: BufferedRequest::new(buffer_delay),
            cancel: CancellationToken::new(),
            metrics: metrics.clone(),
        });

        let context = MessengerContext {
            consumer: service.clone(),
            config: config.clone(),
            cancel: service.cancel.child_token(),
            metrics,
        };
        let messenger = provider.obtain(context).await?;
        *service.messenger.write() = Some(messenger);

        info!(provider = %service.provider_name, "Messaging service connected");
        Ok(service)
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn is_closed(&self) -> bool {
        self.messenger.read().is_none()
    }

    fn messenger(&self) -> Result<Arc<dyn Messenger>> {
        self.messenger
            .read()
            .clone()
            .ok_or(PermweaveError::MessengerClosed)
    }

    /// Tells every other process to recompute everything.
    pub async fn push_update(&self) -> Result<Uuid> {
        self.send(Message::Update).await
    }

    /// Like [`push_update`](Self::push_update), but bursts collapse into one
    /// message sent after the configured buffer delay.
    pub fn push_update_buffered(self: &Arc<Self>) {
        let service = self.clone();
        self.push_buffer.request(move || async move {
            if let Err(e) = service.push_update().await {
                warn!(error = %e, "Failed to push buffered update");
            }
        });
    }

    pub async fn push_user_update(&self, user_uuid: Uuid) -> Result<Uuid> {
        self.send(Message::UserUpdate { user_uuid }).await
    }

    pub async fn push_log(&self, entry: ActionLogEntry) -> Result<Uuid> {
        self.send(Message::Log { entry }).await
    }

    pub async fn push_custom(&self, channel_id: &str, payload: &str) -> Result<Uuid> {
        self.send(Message::Custom {
            channel_id: channel_id.to_string(),
            payload: payload.to_string(),
        })
        .await
    }

    async fn send(&self, message: Message) -> Result<Uuid> {
        let messenger = self.messenger()?;
        let id = Uuid::new_v4();
        self.received.insert(id);

        let encoded = message.to_envelope(id)?.encode()?;
        messenger.send_outgoing_message(&encoded).await?;

        if let Some(metrics) = &self.metrics {
            metrics.messages_sent.inc();
        }
        debug!(%id, message_type = message.message_type(), "Sent message");
        Ok(id)
    }

    pub fn register_custom_listener(
        &self,
        channel_id: &str,
        listener: Arc<dyn CustomMessageListener>,
    ) {
        self.custom_listeners
            .write()
            .entry(channel_id.to_string())
            .or_default()
            .push(listener);
    }

    /// Parses, deduplicates and dispatches one envelope.
    pub fn consume_incoming_message(&self, envelope: RawEnvelope) -> bool {
        if !self.received.insert(envelope.id) {
            if let Some(metrics) = &self.metrics {
                metrics.duplicate_messages.inc();
            }
            debug!(id = %envelope.id, "Ignoring duplicate message");
            return false;
        }
        if let Some(metrics) = &self.metrics {
            metrics.messages_received.inc();
        }

        match Message::from_envelope(&envelope) {
            Ok(Some(message)) => {
                self.dispatch(envelope.id, message);
                true
            }
            Ok(None) => {
                debug!(id = %envelope.id, message_type = %envelope.message_type, "Ignoring message of unknown type");
                true
            }
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "Discarding malformed message");
                false
            }
        }
    }

    fn dispatch(&self, id: Uuid, message: Message) {
        match message {
            Message::Update => {
                info!(%id, "Received update ping, scheduling sync");
                let handler = self.handler.clone();
                self.sync_buffer
                    .request(move || async move { handler.on_update_request().await });
            }
            Message::UserUpdate { user_uuid } => {
                info!(%id, user = %user_uuid, "Received user update ping");
                let handler = self.handler.clone();
                spawn_detached(async move { handler.on_user_update(user_uuid).await });
            }
            Message::Log { entry } => {
                let handler = self.handler.clone();
                spawn_detached(async move { handler.on_log_entry(entry).await });
            }
            Message::Custom {
                channel_id,
                payload,
            } => {
                let listeners = self
                    .custom_listeners
                    .read()
                    .get(&channel_id)
                    .cloned()
                    .unwrap_or_default();
                if listeners.is_empty() {
                    debug!(%id, channel = %channel_id, "No listener for custom channel");
                    return;
                }
                // listeners are plain callbacks and may block
                spawn_blocking_detached(move || {
                    for listener in listeners {
                        listener.on_message(&channel_id, &payload);
                    }
                });
            }
        }
    }

    /// Stops the transport. Further sends fail with
    /// [`PermweaveError::MessengerClosed`].
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let messenger = self.messenger.write().take();
        if let Some(messenger) = messenger {
            messenger.close().await?;
            info!(provider = %self.provider_name, "Messaging service closed");
        }
        Ok(())
    }
}

impl IncomingMessageConsumer for MessagingService {
    fn consume_incoming_message_as_string(&self, encoded: &str) -> bool {
        match RawEnvelope::decode(encoded) {
            Ok(envelope) => self.consume_incoming_message(envelope),
            Err(e) => {
                warn!(error = %e, "Discarding undecodable message");
                false
            }
        }
    }
}

fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!("No async runtime available, dropping message handler"),
    }
}

fn spawn_blocking_detached<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(task);
        }
        Err(_) => warn!("No async runtime available, dropping custom message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        syncs: AtomicUsize,
        users: Mutex<Vec<Uuid>>,
        logs: Mutex<Vec<ActionLogEntry>>,
    }

    #[async_trait]
    impl IncomingMessageHandler for CountingHandler {
        async fn on_update_request(&self) {
            self.syncs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_user_update(&self, uuid: Uuid) {
            self.users.lock().push(uuid);
        }

        async fn on_log_entry(&self, entry: ActionLogEntry) {
            self.logs.lock().push(entry);
        }
    }

    #[derive(Default)]
    struct CapturingMessenger {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Messenger for CapturingMessenger {
        fn name(&self) -> &str {
            "capture"
        }

        async fn send_outgoing_message(&self, encoded: &str) -> Result<()> {
            self.sent.lock().push(encoded.to_string());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct CapturingProvider(Arc<CapturingMessenger>);

    #[async_trait]
    impl MessengerProvider for CapturingProvider {
        fn name(&self) -> &str {
            "capture"
        }

        async fn obtain(&self, _context: MessengerContext) -> Result<Arc<dyn Messenger>> {
            Ok(self.0.clone())
        }
    }

    async fn service() -> (Arc<MessagingService>, Arc<CountingHandler>, Arc<CapturingMessenger>) {
        let handler = Arc::new(CountingHandler::default());
        let messenger = Arc::new(CapturingMessenger::default());
        let config = MessagingConfig {
            update_buffer_ms: 20,
            ..Default::default()
        };
        let service = MessagingService::connect(
            Arc::new(CapturingProvider(messenger.clone())),
            handler.clone(),
            &config,
            None,
        )
        .await
        .unwrap();
        (service, handler, messenger)
    }

    #[tokio::test]
    async fn test_duplicate_envelope_dispatched_once() {
        let (service, handler, _) = service().await;
        let user = Uuid::new_v4();
        let encoded = Message::UserUpdate { user_uuid: user }
            .to_envelope(Uuid::new_v4())
            .unwrap()
            .encode()
            .unwrap();

        assert!(service.consume_incoming_message_as_string(&encoded));
        assert!(!service.consume_incoming_message_as_string(&encoded));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*handler.users.lock(), vec![user]);
    }

    #[tokio::test]
    async fn test_own_messages_are_not_consumed() {
        let (service, handler, messenger) = service().await;
        service.push_user_update(Uuid::new_v4()).await.unwrap();

        let echoed = messenger.sent.lock()[0].clone();
        assert!(!service.consume_incoming_message_as_string(&echoed));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handler.users.lock().is_empty());
    }

    #[tokio::test]
    async fn test_update_pings_are_buffered() {
        let (service, handler, _) = service().await;
        for _ in 0..3 {
            let encoded = Message::Update
                .to_envelope(Uuid::new_v4())
                .unwrap()
                .encode()
                .unwrap();
            assert!(service.consume_incoming_message_as_string(&encoded));
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handler.syncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_types() {
        let (service, _, _) = service().await;
        assert!(!service.consume_incoming_message_as_string("not json"));

        let unknown = format!(r#"{{"id":"{}","type":"somethingnew"}}"#, Uuid::new_v4());
        assert!(service.consume_incoming_message_as_string(&unknown));
    }

    #[tokio::test]
    async fn test_custom_channel_listeners() {
        struct Collect(Mutex<Vec<String>>);
        impl CustomMessageListener for Collect {
            fn on_message(&self, _channel_id: &str, payload: &str) {
                self.0.lock().push(payload.to_string());
            }
        }

        let (service, _, _) = service().await;
        let listener = Arc::new(Collect(Mutex::new(Vec::new())));
        service.register_custom_listener("shop", listener.clone());

        for channel in ["shop", "other"] {
            let encoded = Message::Custom {
                channel_id: channel.into(),
                payload: format!("hello {}", channel),
            }
            .to_envelope(Uuid::new_v4())
            .unwrap()
            .encode()
            .unwrap();
            service.consume_incoming_message_as_string(&encoded);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*listener.0.lock(), vec!["hello shop".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_custom_listener_does_not_hold_up_later_messages() {
        struct Slow(AtomicUsize);
        impl CustomMessageListener for Slow {
            fn on_message(&self, _channel_id: &str, _payload: &str) {
                std::thread::sleep(Duration::from_millis(300));
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (service, handler, _) = service().await;
        let listener = Arc::new(Slow(AtomicUsize::new(0)));
        service.register_custom_listener("slow", listener.clone());

        let custom = Message::Custom {
            channel_id: "slow".into(),
            payload: "work".into(),
        }
        .to_envelope(Uuid::new_v4())
        .unwrap()
        .encode()
        .unwrap();
        let user = Uuid::new_v4();
        let user_update = Message::UserUpdate { user_uuid: user }
            .to_envelope(Uuid::new_v4())
            .unwrap()
            .encode()
            .unwrap();

        let started = std::time::Instant::now();
        assert!(service.consume_incoming_message_as_string(&custom));
        assert!(service.consume_incoming_message_as_string(&user_update));
        assert!(started.elapsed() < Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*handler.users.lock(), vec![user]);
        assert_eq!(listener.0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (service, _, _) = service().await;
        service.close().await.unwrap();
        assert!(service.is_closed());
        assert!(matches!(
            service.push_update().await,
            Err(PermweaveError::MessengerClosed)
        ));
    }
}
