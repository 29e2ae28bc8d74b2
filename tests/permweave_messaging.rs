//! Two engines sharing one storage stay coherent through a messenger.

use permweave::config::MessagingServiceKind;
use permweave::messaging::{LocalBus, Message, MessengerRegistry};
use permweave::storage::InMemoryStorage;
use permweave::{Config, Engine, Node, PermissionHolder, Tristate};

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..150 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn local_config() -> Config {
    let mut config = Config::default();
    config.messaging.service = MessagingServiceKind::Local;
    config.messaging.update_buffer_ms = 20;
    config
}

async fn engine_on(config: Config, bus: &LocalBus, storage: Arc<InMemoryStorage>) -> Arc<Engine> {
    let engine = Engine::builder(config)
        .storage(storage)
        .messenger_registry(Arc::new(MessengerRegistry::with_defaults(bus.clone())))
        .build()
        .unwrap();
    engine.start().await.unwrap();
    engine
}

fn check(engine: &Engine, user: &Arc<PermissionHolder>, permission: &str) -> Tristate {
    engine.has_permission(user, permission).result()
}

#[tokio::test]
async fn test_group_and_user_changes_propagate() {
    init_tracing();
    let bus = LocalBus::new();
    let storage = Arc::new(InMemoryStorage::new());
    let a = engine_on(local_config(), &bus, storage.clone()).await;
    let b = engine_on(local_config(), &bus, storage.clone()).await;

    let staff = a.create_group("staff").await.unwrap();
    let uuid = Uuid::new_v4();
    let user_a = a.load_user(uuid, Some("steve")).await.unwrap();
    a.set_nodes(&user_a, vec![Node::inheritance("staff").unwrap()])
        .await
        .unwrap();

    assert!(eventually(|| b.get_group("staff").is_some()).await);
    let user_b = b.load_user(uuid, None).await.unwrap();
    assert_eq!(check(&b, &user_b, "kick"), Tristate::Undefined);

    a.add_node(&staff, Node::permission("kick", true).unwrap())
        .await
        .unwrap();
    assert!(eventually(|| check(&b, &user_b, "kick") == Tristate::True).await);

    a.add_node(&user_a, Node::permission("kit.daily", true).unwrap())
        .await
        .unwrap();
    assert!(eventually(|| check(&b, &user_b, "kit.daily") == Tristate::True).await);
    assert!(b.metrics().messages_received.get() >= 2);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_replayed_envelope_is_applied_once() {
    let bus = LocalBus::new();
    let storage = Arc::new(InMemoryStorage::new());
    let a = engine_on(local_config(), &bus, storage.clone()).await;
    let b = engine_on(local_config(), &bus, storage.clone()).await;

    let uuid = Uuid::new_v4();
    b.load_user(uuid, None).await.unwrap();
    let invalidations_before = b.metrics().cache_invalidations.get();

    let encoded = Message::UserUpdate { user_uuid: uuid }
        .to_envelope(Uuid::new_v4())
        .unwrap()
        .encode()
        .unwrap();
    bus.publish(&encoded);
    bus.publish(&encoded);

    assert!(eventually(|| b.metrics().duplicate_messages.get() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(b.metrics().messages_received.get(), 1);
    assert_eq!(b.metrics().cache_invalidations.get() - invalidations_before, 1);
    // a has not loaded the user, so the reload is a no-op there
    assert!(a.get_user(&uuid).is_none());

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sql_polling_transport() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("messenger.db").display());

    let mut config = Config::default();
    config.messaging.service = MessagingServiceKind::Sql;
    config.messaging.update_buffer_ms = 20;
    config.messaging.sql.url = url;
    config.messaging.sql.poll_interval_ms = 50;

    let storage = Arc::new(InMemoryStorage::new());
    let bus = LocalBus::new();
    let a = engine_on(config.clone(), &bus, storage.clone()).await;
    let b = engine_on(config, &bus, storage.clone()).await;

    let group = a.create_group("builders").await.unwrap();
    a.add_node(&group, Node::permission("worldedit", true).unwrap())
        .await
        .unwrap();

    assert!(
        eventually(|| {
            b.get_group("builders")
                .map(|g| g.nodes().iter().any(|n| n.key() == "worldedit"))
                .unwrap_or(false)
        })
        .await
    );

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}
