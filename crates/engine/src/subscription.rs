//! Subscription loop: consumes expiry events and drives each attempt through
//! decode → lock → fetch → handle → re-arm or release.
//!
//! Events are processed one at a time. A failure while processing one event
//! is logged and the loop moves on; only the end of the event stream itself
//! stops it, and that is reported through [`SubscriptionHandle::wait`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use redelay_common::types::{Entity, KeyspaceEvent};
use redelay_common::{NotifyError, Result};

use crate::codec;
use crate::lock::LockOutcome;
use crate::notification::NotificationEngine;
use crate::store::EventStream;

/// What the handler wants done after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Re-arm for the next ladder step, if one is left.
    Retry,
    /// Stop; the entity produces no further events.
    Stop,
}

/// Application callback invoked once per locked attempt.
///
/// `fetch_error` is set when the payload could not be read; the entity then
/// carries no value but the handler still decides whether to retry.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, entity: &Entity, fetch_error: Option<&NotifyError>) -> HandlerOutcome;
}

/// Owner's view of a running subscription loop.
pub struct SubscriptionHandle {
    token: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<Result<()>>) -> Self {
        Self { token, task }
    }

    /// Stop receiving events and wait for the loop to exit. A handler that is
    /// already running finishes first.
    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();
        self.wait().await
    }

    /// Wait for the loop to end.
    ///
    /// Returns `Ok(())` after [`SubscriptionHandle::shutdown`] and
    /// [`NotifyError::SubscriptionClosed`] when the event stream ended on its own.
    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(NotifyError::SubscriptionClosed(format!(
                "subscription task failed: {e}"
            ))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

pub(crate) struct SubscriptionLoop {
    engine: NotificationEngine,
    handler: Arc<dyn NotificationHandler>,
    token: CancellationToken,
}

impl SubscriptionLoop {
    pub(crate) fn new(
        engine: NotificationEngine,
        handler: Arc<dyn NotificationHandler>,
        token: CancellationToken,
    ) -> Self {
        Self {
            engine,
            handler,
            token,
        }
    }

    pub(crate) async fn run(self, mut events: EventStream) -> Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    tracing::info!("Notification subscription stopped");
                    return Ok(());
                }
                next = events.next() => match next {
                    Some(event) => event,
                    None => {
                        tracing::error!("Keyspace event stream closed");
                        return Err(NotifyError::SubscriptionClosed(
                            "keyspace event stream ended".to_string(),
                        ));
                    }
                },
            };

            self.process(event).await;
        }
    }

    async fn process(&self, event: KeyspaceEvent) {
        if !event.is_expired() {
            tracing::trace!(channel = %event.channel, kind = %event.payload, "Skipping non-expiry event");
            return;
        }

        let mut entity = match codec::decode(&event.channel) {
            Ok(entity) => entity,
            Err(e) => {
                tracing::warn!(channel = %event.channel, error = %e, "Skipping undecodable event");
                return;
            }
        };

        match self.engine.locks().acquire(&entity).await {
            Ok(LockOutcome::Locked) => {}
            Ok(LockOutcome::NotLocked) => return,
            Err(e) => {
                tracing::warn!(
                    key = %entity.key_lossy(),
                    attempt = entity.attempt(),
                    error = %e,
                    "Failed to acquire lock, skipping event"
                );
                return;
            }
        }

        let fetch_error = self.engine.fetch_payload(&mut entity).await.err();
        if let Some(e) = &fetch_error {
            tracing::warn!(key = %entity.key_lossy(), error = %e, "Payload unavailable");
        }

        let outcome = self.invoke_handler(&entity, fetch_error.as_ref()).await;

        let mut next = entity.clone();
        next.next_attempt();

        if outcome == HandlerOutcome::Retry && self.engine.policy().has_attempt(next.attempt()) {
            match self.engine.put_notification(&next).await {
                Ok(()) => tracing::debug!(
                    key = %next.key_lossy(),
                    attempt = next.attempt(),
                    "Notification re-armed"
                ),
                Err(e) => tracing::error!(
                    key = %next.key_lossy(),
                    attempt = next.attempt(),
                    error = %e,
                    "Failed to re-arm notification, entity dropped"
                ),
            }
            return;
        }

        tracing::debug!(
            key = %entity.key_lossy(),
            attempt = entity.attempt(),
            ?outcome,
            "Notification finished"
        );
        self.engine.locks().release(&entity).await;
    }

    /// Run the handler; a panic is contained and treated as a failed delivery.
    async fn invoke_handler(
        &self,
        entity: &Entity,
        fetch_error: Option<&NotifyError>,
    ) -> HandlerOutcome {
        match AssertUnwindSafe(self.handler.handle(entity, fetch_error))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(
                    key = %entity.key_lossy(),
                    attempt = entity.attempt(),
                    "Notification handler panicked"
                );
                HandlerOutcome::Retry
            }
        }
    }
}
