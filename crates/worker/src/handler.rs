use async_trait::async_trait;

use redelay_common::NotifyError;
use redelay_common::types::Entity;
use redelay_engine::HandlerOutcome;
use redelay_engine::NotificationHandler;

/// Payload that acknowledges a notification.
pub const ACK_PAYLOAD: &[u8] = b"ok";

/// Logs every delivery. Keeps retrying until the ladder runs out unless the
/// payload is [`ACK_PAYLOAD`].
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl NotificationHandler for LoggingHandler {
    async fn handle(&self, entity: &Entity, fetch_error: Option<&NotifyError>) -> HandlerOutcome {
        if let Some(e) = fetch_error {
            tracing::warn!(
                key = %entity.key_lossy(),
                attempt = entity.attempt(),
                error = %e,
                "Notification delivered without payload"
            );
            return HandlerOutcome::Retry;
        }

        let payload = entity.value().map(String::from_utf8_lossy).unwrap_or_default();
        tracing::info!(
            key = %entity.key_lossy(),
            attempt = entity.attempt(),
            payload = %payload,
            "Notification delivered"
        );

        if entity.value() == Some(ACK_PAYLOAD) {
            HandlerOutcome::Stop
        } else {
            HandlerOutcome::Retry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ack_payload_stops() {
        let entity = Entity::new("order-1", b"ok".to_vec());
        assert_eq!(LoggingHandler.handle(&entity, None).await, HandlerOutcome::Stop);
    }

    #[tokio::test]
    async fn test_other_payload_retries() {
        let entity = Entity::new("order-1", b"pending".to_vec());
        assert_eq!(LoggingHandler.handle(&entity, None).await, HandlerOutcome::Retry);
    }

    #[tokio::test]
    async fn test_missing_payload_retries() {
        let entity = Entity::from_parts(b"order-1".to_vec(), 0);
        let err = NotifyError::PayloadNotFound("test:NOTIFY_VALUE:b3JkZXItMQ==".to_string());
        assert_eq!(
            LoggingHandler.handle(&entity, Some(&err)).await,
            HandlerOutcome::Retry
        );
    }
}
