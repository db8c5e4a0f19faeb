use thiserror::Error;

/// Error types shared by the notification engine and its binaries.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Retry policy exhausted: attempt {attempt} is beyond a ladder of {length}")]
    PolicyExhausted { attempt: u32, length: usize },

    #[error("Payload not found: {0}")]
    PayloadNotFound(String),

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),
}

impl NotifyError {
    /// Transport or atomicity failure reported by the key-value store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, NotifyError::Redis(_) | NotifyError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(NotifyError::Store("boom".to_string()).is_store_error());
        assert!(!NotifyError::Decode("bad".to_string()).is_store_error());
        assert!(
            !NotifyError::PolicyExhausted {
                attempt: 3,
                length: 3
            }
            .is_store_error()
        );
    }

    #[test]
    fn test_policy_exhausted_message() {
        let err = NotifyError::PolicyExhausted {
            attempt: 6,
            length: 6,
        };
        assert_eq!(
            err.to_string(),
            "Retry policy exhausted: attempt 6 is beyond a ladder of 6"
        );
    }
}
