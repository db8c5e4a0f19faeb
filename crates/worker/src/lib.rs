//! Shared wiring for the worker and arm binaries.

pub mod handler;

use std::sync::Arc;

use redelay_common::config::AppConfig;
use redelay_common::identity::NodeIdentity;
use redelay_common::redis_pool;
use redelay_engine::{EngineConfig, NotificationEngine, PolicySequence, RedisStore};

/// Install the JSON tracing subscriber, honouring `RUST_LOG` when set.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .json()
        .init();
}

/// Connect to Redis and build an engine from the loaded configuration.
pub async fn connect_engine(config: &AppConfig) -> anyhow::Result<NotificationEngine> {
    let client = redis_pool::open_client(&config.redis_url)?;
    let conn = redis_pool::create_redis_pool(&client).await?;

    let mut store = RedisStore::new(client, conn);
    if let Some(prefix) = &config.redis_key_prefix {
        store = store.with_key_prefix(prefix.clone());
    }
    if config.configure_keyspace_events {
        store.ensure_keyspace_events().await?;
    }

    let policy = PolicySequence::new(config.retry_policies.clone())?
        .with_holding_margin(config.holding_margin());
    let identity = NodeIdentity::detect(config.instance_id.as_deref());
    let engine_config = EngineConfig::new(config.notify_prefix.clone(), identity).with_policy(policy);

    Ok(NotificationEngine::new(engine_config, Arc::new(store))?)
}
