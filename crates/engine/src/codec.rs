//! Entity codec: maps a notification identity and attempt counter to store
//! key names and back.
//!
//! Expiry notifications only carry the name of the expired key, so the
//! attempt counter has to live in the key itself:
//!
//! ```text
//! <prefix>:NOTIFY:<base64(key)>:<attempt>      scheduling key (TTL drives one attempt)
//! <prefix>:NOTIFY_VALUE:<base64(key)>          payload, shared by all attempts
//! <prefix>:NOTIFY_LOCK:<base64(key)>:<attempt> per-attempt lock
//! ```
//!
//! Standard base64 never produces `:`, so arbitrary key bytes cannot break
//! the delimiter split.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use redelay_common::types::Entity;
use redelay_common::{NotifyError, Result};

pub const NOTIFY_KEY_TAG: &str = "NOTIFY";
pub const NOTIFY_VALUE_TAG: &str = "NOTIFY_VALUE";
pub const NOTIFY_LOCK_TAG: &str = "NOTIFY_LOCK";
pub const KEY_SEPARATOR: char = ':';

/// Segments in an unprefixed scheduling key: tag, key, attempt.
const MIN_SEGMENTS: usize = 3;

fn encoded_key(entity: &Entity) -> String {
    STANDARD.encode(entity.key())
}

/// `<base64(key)>:<attempt>`, the attempt-scoped tail shared by scheduling and lock keys.
fn attempt_tail(entity: &Entity) -> String {
    format!("{}{KEY_SEPARATOR}{}", encoded_key(entity), entity.attempt())
}

/// `NOTIFY:<base64(key)>:<attempt>`
pub fn scheduling_key(entity: &Entity) -> String {
    format!("{NOTIFY_KEY_TAG}{KEY_SEPARATOR}{}", attempt_tail(entity))
}

/// `NOTIFY_VALUE:<base64(key)>`, independent of the attempt.
pub fn payload_key(entity: &Entity) -> String {
    format!("{NOTIFY_VALUE_TAG}{KEY_SEPARATOR}{}", encoded_key(entity))
}

/// Recover key and attempt from the identity carried by an expiry event.
///
/// Any namespace in front of the `NOTIFY` tag is ignored; only the last
/// three segments are inspected.
pub fn decode(identity: &str) -> Result<Entity> {
    let segments: Vec<&str> = identity.split(KEY_SEPARATOR).collect();
    if segments.len() < MIN_SEGMENTS {
        return Err(NotifyError::Decode(format!(
            "expected at least {MIN_SEGMENTS} segments in '{identity}'"
        )));
    }

    let &[tag, encoded, attempt] = &segments[segments.len() - MIN_SEGMENTS..] else {
        return Err(NotifyError::Decode(format!("malformed key '{identity}'")));
    };

    if tag != NOTIFY_KEY_TAG {
        return Err(NotifyError::Decode(format!(
            "'{identity}' is not a scheduling key"
        )));
    }

    let key = STANDARD
        .decode(encoded)
        .map_err(|e| NotifyError::Decode(format!("invalid base64 in '{identity}': {e}")))?;

    let attempt: u32 = attempt
        .parse()
        .map_err(|_| NotifyError::Decode(format!("invalid attempt index in '{identity}'")))?;

    Ok(Entity::from_parts(key, attempt))
}

/// Engine namespace: turns entities into fully prefixed store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(NotifyError::Configuration(
                "notification prefix must not be empty".to_string(),
            ));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn scheduling(&self, entity: &Entity) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.prefix, scheduling_key(entity))
    }

    pub fn payload(&self, entity: &Entity) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.prefix, payload_key(entity))
    }

    pub fn lock(&self, entity: &Entity) -> String {
        format!(
            "{}{KEY_SEPARATOR}{NOTIFY_LOCK_TAG}{KEY_SEPARATOR}{}",
            self.prefix,
            attempt_tail(entity)
        )
    }

    /// Pattern matching every scheduling key of this namespace, and nothing else.
    pub fn scheduling_pattern(&self) -> String {
        format!("{}{KEY_SEPARATOR}{NOTIFY_KEY_TAG}{KEY_SEPARATOR}*", self.prefix)
    }
}
