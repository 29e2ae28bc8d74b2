//! End-to-end resolution through the engine: inheritance, contexts,
//! wildcard fallback, deny precedence and meta stacking.

use permweave::config::MetaStackConfig;
use permweave::context::ContextSet;
use permweave::holder::{GroupManager, PermissionHolder};
use permweave::inheritance::{InheritanceResolver, ResolverSettings};
use permweave::meta::DuplicateRemoval;
use permweave::{CheckOrigin, Config, Engine, HolderId, Node, QueryOptions, Tristate};

use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use uuid::Uuid;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn user_in(engine: &Engine, group: &str) -> Arc<PermissionHolder> {
    let user = engine.load_user(Uuid::new_v4(), Some("tester")).await.unwrap();
    engine
        .set_nodes(&user, vec![Node::inheritance(group).unwrap()])
        .await
        .unwrap();
    user
}

#[tokio::test]
async fn test_context_gated_inherited_permission() {
    init_tracing();
    let engine = Engine::builder(Config::default()).build().unwrap();

    let group = engine.create_group("g").await.unwrap();
    let node = Node::builder("chat.colour")
        .context("server", "survival")
        .build()
        .unwrap();
    engine.add_node(&group, node).await.unwrap();
    let user = user_in(&engine, "g").await;

    let global = QueryOptions::contextual(ContextSet::empty());
    let result = engine.check_permission(&user, "chat.colour", &global, CheckOrigin::ThirdPartyApi);
    assert_eq!(result.result(), Tristate::Undefined);

    let survival = QueryOptions::contextual(ContextSet::of("server", "survival").unwrap());
    let result = engine.check_permission(&user, "chat.colour", &survival, CheckOrigin::ThirdPartyApi);
    assert_eq!(result.result(), Tristate::True);
    assert_eq!(result.origin(), Some(&HolderId::group("g")));
    assert_eq!(result.processor(), Some("direct"));
}

#[tokio::test]
async fn test_wildcard_fallback() {
    let engine = Engine::builder(Config::default()).build().unwrap();
    let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();
    engine
        .set_nodes(
            &user,
            vec![
                Node::permission("a.*", false).unwrap(),
                Node::permission("a.b.*", true).unwrap(),
            ],
        )
        .await
        .unwrap();

    let query = QueryOptions::default();
    let check = |perm: &str| {
        engine
            .check_permission(&user, perm, &query, CheckOrigin::Internal)
            .result()
    };
    assert_eq!(check("a.b.c"), Tristate::True);
    assert_eq!(check("a.x"), Tristate::False);
    assert_eq!(check("b"), Tristate::Undefined);
}

#[tokio::test]
async fn test_deny_wins_between_identical_keys() {
    let engine = Engine::builder(Config::default()).build().unwrap();
    let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();
    engine
        .set_nodes(
            &user,
            vec![
                Node::permission("build", true).unwrap(),
                Node::permission("build", false).unwrap(),
            ],
        )
        .await
        .unwrap();

    let result = engine.has_permission(&user, "build");
    assert_eq!(result.result(), Tristate::False);
}

#[tokio::test]
async fn test_more_specific_context_beats_nearer_holder() {
    let engine = Engine::builder(Config::default()).build().unwrap();
    let group = engine.create_group("builders").await.unwrap();
    let scoped = Node::builder("worldedit")
        .context("server", "creative")
        .build()
        .unwrap();
    engine.add_node(&group, scoped).await.unwrap();

    let user = user_in(&engine, "builders").await;
    engine
        .add_node(&user, Node::permission("worldedit", false).unwrap())
        .await
        .unwrap();

    let creative = QueryOptions::contextual(ContextSet::of("server", "creative").unwrap());
    let result = engine.check_permission(&user, "worldedit", &creative, CheckOrigin::Internal);
    assert_eq!(result.result(), Tristate::True);

    let lobby = QueryOptions::contextual(ContextSet::of("server", "lobby").unwrap());
    let result = engine.check_permission(&user, "worldedit", &lobby, CheckOrigin::Internal);
    assert_eq!(result.result(), Tristate::False);
}

#[tokio::test]
async fn test_cycle_is_resolved_once() {
    let groups = GroupManager::new();
    groups.insert(Arc::new(PermissionHolder::new_group(
        "a",
        vec![
            Node::inheritance("b").unwrap(),
            Node::permission("perm.a", true).unwrap(),
        ],
    )));
    groups.insert(Arc::new(PermissionHolder::new_group(
        "b",
        vec![
            Node::inheritance("a").unwrap(),
            Node::permission("perm.b", true).unwrap(),
        ],
    )));
    let user = Arc::new(PermissionHolder::new_user(
        Uuid::new_v4(),
        None,
        "default",
        vec![Node::inheritance("a").unwrap()],
    ));

    let resolution = InheritanceResolver::new(&groups, ResolverSettings::default()).resolve(
        &user,
        &QueryOptions::default(),
        Utc::now(),
    );

    assert_eq!(
        resolution.holders(),
        &[user.id().clone(), HolderId::group("a"), HolderId::group("b")]
    );
    for key in ["perm.a", "perm.b", "group.a", "group.b"] {
        let count = resolution
            .nodes()
            .iter()
            .filter(|r| r.node.key() == key)
            .count();
        assert_eq!(count, 1, "{} should be resolved exactly once", key);
    }
}

fn bracket_stack() -> MetaStackConfig {
    MetaStackConfig {
        format: vec!["highest".to_string(), "lowest".to_string()],
        duplicates: DuplicateRemoval::RetainAll,
        start_spacer: "[".to_string(),
        middle_spacer: " | ".to_string(),
        end_spacer: "]".to_string(),
    }
}

#[tokio::test]
async fn test_meta_stack_round_trip() {
    let mut config = Config::default();
    config.meta.prefix = bracket_stack();
    let engine = Engine::builder(config).build().unwrap();

    let group = engine.create_group("vip").await.unwrap();
    engine
        .set_nodes(
            &group,
            vec![
                Node::prefix(10, "A").unwrap(),
                Node::prefix(5, "B").unwrap(),
                Node::meta("rank", "gold").unwrap(),
                Node::weight(20).unwrap(),
            ],
        )
        .await
        .unwrap();
    let user = user_in(&engine, "vip").await;

    let meta = engine.meta_data(&user, &QueryOptions::default());
    assert_eq!(meta.prefix(CheckOrigin::ThirdPartyApi), Some("[A | B]"));
    assert_eq!(meta.meta_value("rank", CheckOrigin::ThirdPartyApi), Some("gold"));
    assert_eq!(meta.weight(), Some(20));
    assert_eq!(meta.suffix(CheckOrigin::ThirdPartyApi), None);
}

#[tokio::test]
async fn test_empty_meta_stack_builds_nothing() {
    let mut config = Config::default();
    config.meta.prefix = bracket_stack();
    let engine = Engine::builder(config).build().unwrap();
    let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();

    let meta = engine.meta_data(&user, &QueryOptions::default());
    assert_eq!(meta.prefix(CheckOrigin::Internal), None);
    assert!(meta.prefixes().is_empty());
}
