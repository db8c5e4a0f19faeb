//! Key-value store capability required by the notification engine.
//!
//! The engine only needs a handful of single-key operations plus a pattern
//! subscription to keyspace events. Everything else (data structures,
//! cluster setup, TLS) stays outside the engine.
//!
//! - [`RedisStore`]: production backend over a Redis connection manager
//! - [`MemoryStore`]: in-process backend with TTLs and expiry events, for
//!   tests and local development
//!
//! Key namespacing is the store's business: a store that applies an outer
//! prefix must apply it both to writes and to the subscription pattern, and
//! strip it from the channel names it reports back.

pub mod memory;
pub mod redis_store;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use redelay_common::Result;
use redelay_common::types::KeyspaceEvent;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Stream of keyspace events produced by a pattern subscription.
///
/// The stream ends when the underlying subscription closes.
pub type EventStream = Pin<Box<dyn Stream<Item = KeyspaceEvent> + Send>>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key; `None` when it does not exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a key with a TTL, overwriting any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Atomically create a key with a TTL. Returns `false` if it already exists.
    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[&str]) -> Result<usize>;

    /// Subscribe to keyspace events of every key matching a glob pattern.
    async fn subscribe_pattern(&self, pattern: &str) -> Result<EventStream>;

    /// Whether [`KeyValueStore::subscribe_pattern`] is available on this backend.
    fn supports_pattern_subscribe(&self) -> bool {
        true
    }
}
