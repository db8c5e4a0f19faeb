//! Backoff ladder, one delay per delivery attempt.
//!
//! The ladder must be non-decreasing so that the lock TTL (the last step)
//! always covers any single attempt's delay.

use std::time::Duration;

use redelay_common::{NotifyError, Result};

/// Default extra lifetime of the payload key beyond the last ladder step.
pub const DEFAULT_HOLDING_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Ordered, validated sequence of per-attempt delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySequence {
    steps: Vec<Duration>,
    holding_margin: Duration,
}

impl PolicySequence {
    /// Build a ladder, rejecting any step shorter than the one before it.
    pub fn new(steps: Vec<Duration>) -> Result<Self> {
        if let Some(pos) = steps.windows(2).position(|pair| pair[0] > pair[1]) {
            return Err(NotifyError::Configuration(format!(
                "retry policy must be non-decreasing: step {} ({:?}) is shorter than step {} ({:?})",
                pos + 1,
                steps[pos + 1],
                pos,
                steps[pos]
            )));
        }

        Ok(Self {
            steps,
            holding_margin: DEFAULT_HOLDING_MARGIN,
        })
    }

    pub fn with_holding_margin(mut self, margin: Duration) -> Self {
        self.holding_margin = margin;
        self
    }

    /// Delay for the given attempt.
    pub fn at(&self, attempt: u32) -> Result<Duration> {
        self.steps
            .get(attempt as usize)
            .copied()
            .ok_or(NotifyError::PolicyExhausted {
                attempt,
                length: self.steps.len(),
            })
    }

    /// Final step, or zero for an empty ladder.
    pub fn last(&self) -> Duration {
        self.steps.last().copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// TTL of the payload key: outlives every scheduled attempt plus delivery jitter.
    /// Saturates at `Duration::MAX`.
    pub fn holding(&self) -> Duration {
        self.last().saturating_add(self.holding_margin)
    }

    /// Whether a retry may still be armed for this attempt.
    pub fn has_attempt(&self, attempt: u32) -> bool {
        (attempt as usize) < self.steps.len()
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }
}

impl Default for PolicySequence {
    /// 1m, 5m, 10m, 30m, 60m, 120m.
    fn default() -> Self {
        Self {
            steps: [1, 5, 10, 30, 60, 120]
                .into_iter()
                .map(|minutes| Duration::from_secs(minutes * 60))
                .collect(),
            holding_margin: DEFAULT_HOLDING_MARGIN,
        }
    }
}
