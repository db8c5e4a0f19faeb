//! Delayed, retryable notification delivery on top of a key-value store with
//! TTL expiry events.
//!
//! A producer arms an [`Entity`](redelay_common::types::Entity) with
//! [`NotificationEngine::put_notification`]; when the scheduling key's TTL
//! runs out the store broadcasts an expiry event, exactly one subscribed
//! engine instance wins the per-attempt lock, and its handler decides whether
//! to retry with the next step of the backoff ladder.

pub mod codec;
pub mod lock;
pub mod notification;
pub mod policy;
pub mod store;
pub mod subscription;

pub use lock::{LockManager, LockOutcome};
pub use notification::{EngineConfig, NotificationEngine};
pub use policy::PolicySequence;
pub use store::{KeyValueStore, MemoryStore, RedisStore};
pub use subscription::{HandlerOutcome, NotificationHandler, SubscriptionHandle};
