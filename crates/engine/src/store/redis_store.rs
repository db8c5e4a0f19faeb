//! Redis-backed key-value store.
//!
//! Single-key commands go through a shared `ConnectionManager`; the pattern
//! subscription opens its own pub/sub connection, since a subscribed
//! connection cannot issue regular commands.
//!
//! Expiry notifications arrive on `__keyspace@<db>__:<key>` channels with an
//! `expired` payload. They require `notify-keyspace-events` to include `K`
//! and `x` (see [`RedisStore::ensure_keyspace_events`]).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Msg};

use redelay_common::Result;
use redelay_common::types::KeyspaceEvent;

use super::{EventStream, KeyValueStore};

const KEYSPACE_CHANNEL_PREFIX: &str = "__keyspace@";
const KEYSPACE_DB_SUFFIX: &str = "__:";

/// Redis implementation of [`KeyValueStore`].
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisStore {
    pub fn new(client: Client, conn: ConnectionManager) -> Self {
        Self {
            client,
            conn,
            key_prefix: None,
        }
    }

    /// Apply an outer namespace to every key and to the subscription pattern.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.key_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.key_prefix.as_deref()
    }

    fn expand_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    /// Make sure the server publishes keyspace expiry events, keeping any
    /// flags that are already enabled.
    pub async fn ensure_keyspace_events(&self) -> Result<()> {
        let mut conn = self.conn.clone();

        let reply: Vec<String> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async(&mut conn)
            .await?;
        let current = reply.get(1).map(String::as_str).unwrap_or_default();

        let Some(flags) = merge_keyspace_flags(current) else {
            tracing::debug!(flags = current, "Keyspace expiry events already enabled");
            return Ok(());
        };

        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(&flags)
            .query_async(&mut conn)
            .await?;

        tracing::info!(previous = current, flags = %flags, "Enabled keyspace expiry events");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.expand_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();

        // SET key value PX ttl_ms
        let _: () = redis::cmd("SET")
            .arg(self.expand_key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();

        // SET key value NX PX ttl_ms
        // Returns Some("OK") if the key was created, None if it already exists
        let result: Option<String> = redis::cmd("SET")
            .arg(self.expand_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let expanded: Vec<String> = keys.iter().map(|key| self.expand_key(key)).collect();
        let removed: usize = conn.del(expanded).await?;
        Ok(removed)
    }

    async fn subscribe_pattern(&self, pattern: &str) -> Result<EventStream> {
        let channel_pattern = format!(
            "{KEYSPACE_CHANNEL_PREFIX}*{KEYSPACE_DB_SUFFIX}{}",
            self.expand_key(pattern)
        );

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(&channel_pattern).await?;

        tracing::info!(pattern = %channel_pattern, "Subscribed to keyspace events");

        let key_prefix = self.key_prefix.clone();
        let stream = pubsub
            .into_on_message()
            .filter_map(move |msg| futures::future::ready(to_event(&msg, key_prefix.as_deref())));

        Ok(Box::pin(stream))
    }
}

/// Redis rejects `PX 0`, so sub-millisecond TTLs are rounded up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn to_event(msg: &Msg, key_prefix: Option<&str>) -> Option<KeyspaceEvent> {
    let channel = msg.get_channel_name();
    let Some(key) = logical_key(channel, key_prefix) else {
        tracing::debug!(channel, "Ignoring message outside the store namespace");
        return None;
    };

    match msg.get_payload::<String>() {
        Ok(payload) => Some(KeyspaceEvent::new(key, payload)),
        Err(e) => {
            tracing::warn!(channel, error = %e, "Unreadable keyspace event payload");
            None
        }
    }
}

/// `__keyspace@0__:<prefix>:<key>` → `<key>`
fn logical_key<'a>(channel: &'a str, key_prefix: Option<&str>) -> Option<&'a str> {
    let rest = channel.strip_prefix(KEYSPACE_CHANNEL_PREFIX)?;
    let (_db, key) = rest.split_once(KEYSPACE_DB_SUFFIX)?;

    match key_prefix {
        Some(prefix) => key.strip_prefix(prefix)?.strip_prefix(':'),
        None => Some(key),
    }
}

/// Flags to write so that keyspace (`K`) expiry (`x`) events are published,
/// or `None` when the current flags already cover them. `A` implies `x`.
fn merge_keyspace_flags(current: &str) -> Option<String> {
    let has_keyspace = current.contains('K');
    let has_expired = current.contains('x') || current.contains('A');
    if has_keyspace && has_expired {
        return None;
    }

    let mut flags = current.to_string();
    if !has_keyspace {
        flags.push('K');
    }
    if !has_expired {
        flags.push('x');
    }
    Some(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_key_without_prefix() {
        assert_eq!(
            logical_key("__keyspace@0__:redelay:NOTIFY:YWJj:0", None),
            Some("redelay:NOTIFY:YWJj:0")
        );
    }

    #[test]
    fn test_logical_key_strips_store_prefix() {
        assert_eq!(
            logical_key("__keyspace@12__:TEST:dev:redelay:NOTIFY:YWJj:1", Some("TEST:dev")),
            Some("redelay:NOTIFY:YWJj:1")
        );
        assert_eq!(
            logical_key("__keyspace@0__:OTHER:redelay:NOTIFY:YWJj:1", Some("TEST")),
            None
        );
    }

    #[test]
    fn test_logical_key_rejects_non_keyspace_channel() {
        assert_eq!(logical_key("orders:updates", None), None);
    }

    #[test]
    fn test_ttl_millis_rounds_up_to_one() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(90)), 90_000);
    }

    #[test]
    fn test_merge_keyspace_flags() {
        assert_eq!(merge_keyspace_flags(""), Some("Kx".to_string()));
        assert_eq!(merge_keyspace_flags("Ex"), Some("ExK".to_string()));
        assert_eq!(merge_keyspace_flags("Kg"), Some("Kgx".to_string()));
        assert_eq!(merge_keyspace_flags("KEA"), None);
        assert_eq!(merge_keyspace_flags("Kx"), None);
    }
}
