//! In-memory key-value store with TTLs and keyspace expiry events.
//!
//! Mirrors the subset of Redis behaviour the engine depends on: per-key TTL,
//! atomic create-if-absent, and an `expired` event published to pattern
//! subscribers when a key's TTL runs out.
//!
//! ## Limitations
//!
//! - **Single-process only**: subscribers must share the same `MemoryStore`
//! - **Expiry is driven explicitly**: keys are reclaimed lazily on access, by
//!   [`MemoryStore::sweep_expired`], by a sweeper task, or forced with
//!   [`MemoryStore::expire`]
//! - **No persistence**: all state is lost when the store is dropped

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use redelay_common::types::KeyspaceEvent;
use redelay_common::{NotifyError, Result};

use super::{EventStream, KeyValueStore};

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Stand-in expiry for TTLs too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry_deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-memory implementation of [`KeyValueStore`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    events: Mutex<Option<broadcast::Sender<KeyspaceEvent>>>,
    pattern_subscribe: bool,
    fail_sets: RwLock<Option<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a lock poison error to a store error.
fn poison_err<T>(_: PoisonError<T>) -> NotifyError {
    NotifyError::Store("lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events: Mutex::new(Some(events)),
            pattern_subscribe: true,
            fail_sets: RwLock::new(None),
        }
    }

    /// A store that reports no pattern subscription support.
    pub fn without_pattern_subscribe() -> Self {
        Self {
            pattern_subscribe: false,
            ..Self::new()
        }
    }

    /// Make plain `set` calls on keys matching `pattern` fail with a store
    /// error, as a dropped connection would. `None` clears the injection.
    pub fn fail_sets_matching(&self, pattern: Option<&str>) {
        if let Ok(mut fail_sets) = self.fail_sets.write() {
            *fail_sets = pattern.map(str::to_string);
        }
    }

    fn set_should_fail(&self, key: &str) -> bool {
        self.fail_sets
            .read()
            .map(|pattern| pattern.as_deref().is_some_and(|p| glob_match(p, key)))
            .unwrap_or(false)
    }

    /// Publish an arbitrary keyspace event to current subscribers.
    pub fn publish(&self, event: KeyspaceEvent) {
        let Ok(events) = self.events.lock() else {
            return;
        };
        if let Some(sender) = events.as_ref() {
            // No receivers is not an error for a broadcast
            let _ = sender.send(event);
        }
    }

    /// Expire a key now, publishing its `expired` event. Returns whether the key existed.
    pub fn expire(&self, key: &str) -> Result<bool> {
        let removed = self
            .entries
            .write()
            .map_err(poison_err)?
            .remove(key)
            .is_some();

        if removed {
            self.publish(KeyspaceEvent::expired(key));
        }
        Ok(removed)
    }

    /// Remove every key whose TTL has elapsed, publishing one event per key.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut entries = self.entries.write().map_err(poison_err)?;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        let count = expired.len();
        for key in expired {
            self.publish(KeyspaceEvent::expired(key));
        }
        Ok(count)
    }

    /// Sweep expired keys periodically until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if let Err(e) = store.sweep_expired() {
                    tracing::warn!(error = %e, "Memory store sweep failed");
                }
            }
        })
    }

    /// End every open subscription stream; later subscriptions fail.
    pub fn close_subscriptions(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.take();
        }
    }

    /// TTL a live key was written with.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().ok()?;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.ttl)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ttl_of(key).is_some()
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop a key whose TTL elapsed, as Redis does on access, and report it.
    fn reclaim_if_expired(&self, entries: &mut HashMap<String, Entry>, key: &str) -> bool {
        let expired = entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()));
        if expired {
            entries.remove(key);
        }
        expired
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        let reclaimed = self.reclaim_if_expired(&mut entries, key);
        let value = entries.get(key).map(|entry| entry.value.clone());
        drop(entries);

        if reclaimed {
            self.publish(KeyspaceEvent::expired(key));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if self.set_should_fail(key) {
            return Err(NotifyError::Store(format!("injected failure writing '{key}'")));
        }

        let entry = Entry {
            value: value.to_vec(),
            ttl,
            expires_at: expiry_deadline(ttl),
        };
        self.entries
            .write()
            .map_err(poison_err)?
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        let reclaimed = self.reclaim_if_expired(&mut entries, key);

        let created = !entries.contains_key(key);
        if created {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_vec(),
                    ttl,
                    expires_at: expiry_deadline(ttl),
                },
            );
        }
        drop(entries);

        if reclaimed {
            self.publish(KeyspaceEvent::expired(key));
        }
        Ok(created)
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(poison_err)?;
        let removed = keys
            .iter()
            .filter_map(|key| entries.remove(*key))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed)
    }

    async fn subscribe_pattern(&self, pattern: &str) -> Result<EventStream> {
        if !self.pattern_subscribe {
            return Err(NotifyError::Store(
                "pattern subscription is not supported by this store".to_string(),
            ));
        }

        let receiver = self
            .events
            .lock()
            .map_err(poison_err)?
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| NotifyError::Store("store subscriptions are closed".to_string()))?;

        let pattern = pattern.to_string();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Memory store subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| futures::future::ready(glob_match(&pattern, &event.channel)));

        Ok(Box::pin(stream))
    }

    fn supports_pattern_subscribe(&self) -> bool {
        self.pattern_subscribe
    }
}

/// Redis-style glob supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let (p, t) = (pattern.as_bytes(), text.as_bytes());
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("app:NOTIFY:*", "app:NOTIFY:YWJj:0"));
        assert!(!glob_match("app:NOTIFY:*", "app:NOTIFY_VALUE:YWJj"));
        assert!(!glob_match("app:NOTIFY:*", "app:NOTIFY_LOCK:YWJj:0"));
        assert!(glob_match("a*c?e", "abbbcde"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("a?", "a"));
    }

    #[tokio::test]
    async fn test_set_get_and_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", b"v", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.ttl_of("k"), Some(Duration::from_secs(30)));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::MAX).await.unwrap();
        assert!(store
            .set_if_not_exists("lock", b"node-a", Duration::MAX)
            .await
            .unwrap());

        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.ttl_of("lock"), Some(Duration::MAX));
        assert_eq!(store.sweep_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_if_not_exists() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);
        assert!(store.set_if_not_exists("lock", b"a", ttl).await.unwrap());
        assert!(!store.set_if_not_exists("lock", b"b", ttl).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_elapsed_key_is_absent_and_recreatable() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        store
            .set("lock", b"old", Duration::ZERO)
            .await
            .unwrap();
        assert!(
            store
                .set_if_not_exists("lock", b"new", Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_delete_counts_existing_keys() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);
        store.set("a", b"1", ttl).await.unwrap();
        store.set("b", b"2", ttl).await.unwrap();
        assert_eq!(store.delete(&["a", "b", "c"]).await.unwrap(), 2);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_expire_publishes_to_matching_subscribers() {
        let store = MemoryStore::new();
        let mut events = store.subscribe_pattern("app:NOTIFY:*").await.unwrap();

        let ttl = Duration::from_secs(30);
        store.set("app:NOTIFY_VALUE:x", b"v", ttl).await.unwrap();
        store.set("app:NOTIFY:x:0", b"", ttl).await.unwrap();
        assert!(store.expire("app:NOTIFY_VALUE:x").unwrap());
        assert!(store.expire("app:NOTIFY:x:0").unwrap());
        assert!(!store.expire("app:NOTIFY:x:0").unwrap());

        let event = events.next().await.unwrap();
        assert_eq!(event, KeyspaceEvent::expired("app:NOTIFY:x:0"));
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let store = MemoryStore::new();
        let mut events = store.subscribe_pattern("*").await.unwrap();
        store.set("gone", b"", Duration::ZERO).await.unwrap();
        store
            .set("kept", b"", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.sweep_expired().unwrap(), 1);
        assert_eq!(events.next().await.unwrap(), KeyspaceEvent::expired("gone"));
        assert_eq!(store.keys(), vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_close_subscriptions_ends_streams() {
        let store = MemoryStore::new();
        let mut events = store.subscribe_pattern("*").await.unwrap();
        store.close_subscriptions();
        assert!(events.next().await.is_none());
        assert!(store.subscribe_pattern("*").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_set_failure() {
        let store = MemoryStore::new();
        store.fail_sets_matching(Some("app:*"));
        let err = store
            .set("app:k", b"v", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_store_error());
        assert!(store.set("other", b"v", Duration::from_secs(1)).await.is_ok());

        store.fail_sets_matching(None);
        assert!(store.set("app:k", b"v", Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_without_pattern_subscribe() {
        let store = MemoryStore::without_pattern_subscribe();
        assert!(!store.supports_pattern_subscribe());
        assert!(store.subscribe_pattern("*").await.is_err());
    }
}
