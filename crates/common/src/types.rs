/// Payload of a keyspace notification that reports a TTL expiry.
pub const EXPIRED_EVENT: &str = "expired";

/// A logical notification: caller-chosen identity, payload and attempt counter.
///
/// The key stays the same for every retry attempt. `attempt` counts the
/// deliveries already attempted and is 0 when the producer first arms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    attempt: u32,
}

impl Entity {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            attempt: 0,
        }
    }

    /// Rebuild an entity from a decoded scheduling key; the payload is fetched separately.
    pub fn from_parts(key: Vec<u8>, attempt: u32) -> Self {
        Self {
            key,
            value: None,
            attempt,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Key rendered as UTF-8 for logging.
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }

    /// `None` when the payload expired or was evicted before delivery.
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn set_value(&mut self, value: Option<Vec<u8>>) {
        self.value = value;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Advance to the next attempt after a delivery.
    pub fn next_attempt(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }
}

/// A keyspace event as seen by the engine.
///
/// `channel` is the logical key name the event is about (store namespace
/// already stripped); `payload` is the event kind, e.g. `"expired"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceEvent {
    pub channel: String,
    pub payload: String,
}

impl KeyspaceEvent {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn expired(channel: impl Into<String>) -> Self {
        Self::new(channel, EXPIRED_EVENT)
    }

    pub fn is_expired(&self) -> bool {
        self.payload == EXPIRED_EVENT
    }
}
