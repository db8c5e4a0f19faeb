//! Integration tests against a real Redis server.
//!
//! Requires a reachable server with `CONFIG SET` allowed:
//!   REDIS_URL=redis://localhost:6379 cargo test -p redelay-engine -- --ignored

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use redelay_common::NotifyError;
use redelay_common::identity::NodeIdentity;
use redelay_common::redis_pool;
use redelay_common::types::Entity;
use redelay_engine::{
    EngineConfig, HandlerOutcome, KeyValueStore, NotificationEngine, NotificationHandler,
    PolicySequence, RedisStore,
};

struct ChannelHandler {
    outcome: HandlerOutcome,
    deliveries: mpsc::UnboundedSender<(Vec<u8>, u32, Option<Vec<u8>>)>,
}

#[async_trait]
impl NotificationHandler for ChannelHandler {
    async fn handle(&self, entity: &Entity, _fetch_error: Option<&NotifyError>) -> HandlerOutcome {
        let _ = self.deliveries.send((
            entity.key().to_vec(),
            entity.attempt(),
            entity.value().map(<[u8]>::to_vec),
        ));
        self.outcome
    }
}

/// A store namespaced to this test run so parallel runs do not collide.
async fn setup_store() -> RedisStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let client = redis_pool::open_client(&url).expect("Invalid REDIS_URL");
    let conn = redis_pool::create_redis_pool(&client)
        .await
        .expect("Failed to connect to Redis");

    let prefix = format!("redelay-test-{}", uuid::Uuid::new_v4());
    let store = RedisStore::new(client, conn).with_key_prefix(prefix);
    store
        .ensure_keyspace_events()
        .await
        .expect("Failed to enable keyspace events");
    store
}

fn short_ladder() -> PolicySequence {
    PolicySequence::new(vec![Duration::from_secs(1), Duration::from_secs(2)])
        .unwrap()
        .with_holding_margin(Duration::from_secs(10))
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_set_get_and_delete() {
    let store = setup_store().await;

    store.set("k", b"v", Duration::from_secs(5)).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

    assert!(!store.set_if_not_exists("k", b"w", Duration::from_secs(5)).await.unwrap());
    assert!(store.set_if_not_exists("lock", b"w", Duration::from_secs(5)).await.unwrap());

    assert_eq!(store.delete(&["k", "lock", "missing"]).await.unwrap(), 2);
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_ladder_is_delivered_then_exhausted() {
    let store = Arc::new(setup_store().await);
    let config = EngineConfig::new("test", NodeIdentity::detect(None)).with_policy(short_ladder());
    let engine = NotificationEngine::new(config, store.clone()).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = ChannelHandler {
        outcome: HandlerOutcome::Retry,
        deliveries: tx,
    };
    let handle = engine.subscribe(Arc::new(handler)).await.unwrap();

    let key = uuid::Uuid::new_v4().to_string();
    engine
        .put_notification(&Entity::new(key.clone(), b"hello".to_vec()))
        .await
        .unwrap();

    for expected_attempt in 0..2 {
        let (delivered_key, attempt, value) =
            tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("no delivery in time")
                .expect("channel closed");
        assert_eq!(delivered_key, key.as_bytes());
        assert_eq!(attempt, expected_attempt);
        assert_eq!(value.as_deref(), Some(&b"hello"[..]));
    }

    // Last step was delivered; nothing is re-armed
    let extra = tokio::time::timeout(Duration::from_secs(4), rx.recv()).await;
    assert!(extra.is_err());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_two_instances_deliver_once() {
    let store = Arc::new(setup_store().await);
    let (tx, mut rx) = mpsc::unbounded_channel();
    // Retrying keeps the winner's lock; the long second step stays out of the window
    let policy = PolicySequence::new(vec![Duration::from_secs(1), Duration::from_secs(60)]).unwrap();

    let mut engines = Vec::new();
    let mut handles = Vec::new();
    for node in ["node-a", "node-b"] {
        let config = EngineConfig::new("test", NodeIdentity::new(node)).with_policy(policy.clone());
        let engine = NotificationEngine::new(config, store.clone()).unwrap();
        let handler = ChannelHandler {
            outcome: HandlerOutcome::Retry,
            deliveries: tx.clone(),
        };
        handles.push(engine.subscribe(Arc::new(handler)).await.unwrap());
        engines.push(engine);
    }

    engines[0]
        .put_notification(&Entity::new("shared", b"payload".to_vec()))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
    assert!(matches!(first, Ok(Some((_, 0, _)))));
    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    assert!(second.is_err());

    for handle in handles {
        handle.shutdown().await.unwrap();
    }
}
