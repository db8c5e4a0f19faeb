//! Lock manager: turns the store's broadcast of expiry events into a single
//! handler per attempt.
//!
//! Every engine instance receives every expiry event. Each one races to
//! create the attempt's lock key with `SET NX PX`; the winner handles the
//! attempt and the others skip it. The lock lives for the last ladder step,
//! so it cannot expire while its own attempt is still being processed.

use std::sync::Arc;
use std::time::Duration;

use redelay_common::Result;
use redelay_common::identity::NodeIdentity;
use redelay_common::types::Entity;

use crate::codec::KeySpace;
use crate::store::KeyValueStore;

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This instance owns the attempt.
    Locked,
    /// Another instance owns the attempt.
    NotLocked,
}

impl LockOutcome {
    pub const fn is_locked(self) -> bool {
        matches!(self, Self::Locked)
    }
}

/// Per-attempt distributed lock built on create-if-absent.
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    identity: NodeIdentity,
    ttl: Duration,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: KeySpace,
        identity: NodeIdentity,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            identity,
            ttl,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Try to take the lock for the entity's current attempt.
    ///
    /// Finding our own token already in place counts as `Locked`, so a
    /// duplicate delivery to the same instance is idempotent.
    pub async fn acquire(&self, entity: &Entity) -> Result<LockOutcome> {
        let key = self.keys.lock(entity);
        let token = self.identity.as_str().as_bytes();

        if self.store.set_if_not_exists(&key, token, self.ttl).await? {
            return Ok(LockOutcome::Locked);
        }

        let holder = self.store.get(&key).await?;
        if holder.as_deref() == Some(token) {
            return Ok(LockOutcome::Locked);
        }

        tracing::debug!(
            lock_key = %key,
            holder = %holder.as_deref().map(String::from_utf8_lossy).unwrap_or_default(),
            "Attempt owned by another instance"
        );
        Ok(LockOutcome::NotLocked)
    }

    /// Delete the lock. Best effort: a failure is logged and the TTL reclaims the key.
    pub async fn release(&self, entity: &Entity) {
        let key = self.keys.lock(entity);
        match self.store.delete(&[&key]).await {
            Ok(_) => tracing::debug!(lock_key = %key, "Lock released"),
            Err(e) => tracing::warn!(lock_key = %key, error = %e, "Failed to release lock"),
        }
    }
}
