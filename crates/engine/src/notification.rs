//! Notification engine: arms notifications and runs the subscription loop.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use redelay_common::identity::NodeIdentity;
//! use redelay_common::types::Entity;
//! use redelay_engine::notification::{EngineConfig, NotificationEngine};
//! use redelay_engine::store::MemoryStore;
//!
//! # async fn arm() -> redelay_common::Result<()> {
//! let config = EngineConfig::new("orders", NodeIdentity::detect(None));
//! let engine = NotificationEngine::new(config, Arc::new(MemoryStore::new()))?;
//! engine
//!     .put_notification(&Entity::new("order-42", b"paid".to_vec()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use redelay_common::identity::NodeIdentity;
use redelay_common::types::Entity;
use redelay_common::{NotifyError, Result};

use crate::codec::KeySpace;
use crate::lock::LockManager;
use crate::policy::PolicySequence;
use crate::store::KeyValueStore;
use crate::subscription::{NotificationHandler, SubscriptionHandle, SubscriptionLoop};

/// Engine settings, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Namespace in front of every notification key
    pub prefix: String,
    /// Backoff ladder
    pub policy: PolicySequence,
    /// Lock token of this instance
    pub identity: NodeIdentity,
}

impl EngineConfig {
    /// Settings with the default backoff ladder.
    pub fn new(prefix: impl Into<String>, identity: NodeIdentity) -> Self {
        Self {
            prefix: prefix.into(),
            policy: PolicySequence::default(),
            identity,
        }
    }

    pub fn with_policy(mut self, policy: PolicySequence) -> Self {
        self.policy = policy;
        self
    }
}

struct EngineInner {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    policy: PolicySequence,
    locks: LockManager,
    pattern_subscribe: bool,
}

/// Delayed, retryable notification delivery over a TTL key-value store.
///
/// Cheap to clone; clones share the same store and identity.
#[derive(Clone)]
pub struct NotificationEngine {
    inner: Arc<EngineInner>,
}

impl NotificationEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let keys = KeySpace::new(config.prefix)?;
        if config.policy.is_empty() {
            return Err(NotifyError::Configuration(
                "retry policy must contain at least one step".to_string(),
            ));
        }

        let pattern_subscribe = store.supports_pattern_subscribe();
        let locks = LockManager::new(
            store.clone(),
            keys.clone(),
            config.identity,
            config.policy.last(),
        );

        tracing::info!(
            prefix = keys.prefix(),
            identity = %locks.identity(),
            attempts = config.policy.len(),
            "Notification engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                keys,
                policy: config.policy,
                locks,
                pattern_subscribe,
            }),
        })
    }

    pub fn policy(&self) -> &PolicySequence {
        &self.inner.policy
    }

    pub fn keys(&self) -> &KeySpace {
        &self.inner.keys
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.inner.locks.identity()
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Arm (or re-arm) the entity's current attempt.
    ///
    /// The payload is written first with the holding TTL, then the scheduling
    /// key with the attempt's delay. The two writes are not atomic: if the
    /// second fails the payload simply expires; if a later refresh fails after
    /// the scheduling key exists, the attempt fires without a payload.
    /// An entity without a value only gets its scheduling key.
    pub async fn put_notification(&self, entity: &Entity) -> Result<()> {
        let delay = self.inner.policy.at(entity.attempt())?;

        match entity.value() {
            Some(value) => {
                self.inner
                    .store
                    .set(
                        &self.inner.keys.payload(entity),
                        value,
                        self.inner.policy.holding(),
                    )
                    .await?
            }
            None => tracing::debug!(
                key = %entity.key_lossy(),
                "No payload to refresh, arming scheduling key only"
            ),
        }

        let scheduling_key = self.inner.keys.scheduling(entity);
        self.inner.store.set(&scheduling_key, &[], delay).await?;

        tracing::debug!(
            key = %entity.key_lossy(),
            attempt = entity.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Notification armed"
        );
        Ok(())
    }

    /// Load the entity's payload. A missing payload is reported as
    /// [`NotifyError::PayloadNotFound`].
    pub(crate) async fn fetch_payload(&self, entity: &mut Entity) -> Result<()> {
        let key = self.inner.keys.payload(entity);
        match self.inner.store.get(&key).await? {
            Some(value) => {
                entity.set_value(Some(value));
                Ok(())
            }
            None => Err(NotifyError::PayloadNotFound(key)),
        }
    }

    /// Subscribe to this namespace's expiry events and start the loop in the background.
    ///
    /// Fails immediately when the store cannot subscribe to a pattern.
    pub async fn subscribe(
        &self,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<SubscriptionHandle> {
        if !self.inner.pattern_subscribe {
            return Err(NotifyError::Configuration(
                "store does not support pattern subscriptions".to_string(),
            ));
        }

        let pattern = self.inner.keys.scheduling_pattern();
        let events = self.inner.store.subscribe_pattern(&pattern).await?;

        let token = CancellationToken::new();
        let subscription = SubscriptionLoop::new(self.clone(), handler, token.clone());
        let task = tokio::spawn(subscription.run(events));

        tracing::info!(
            pattern = %pattern,
            identity = %self.identity(),
            "Notification subscription started"
        );

        Ok(SubscriptionHandle::new(token, task))
    }
}
