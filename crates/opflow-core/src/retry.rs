// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded polling with backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// How many times to poll and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of checks, including the first one.
    pub max_attempts: u32,
    /// Delay after the first unsuccessful check.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each unsuccessful check.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Constant delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1,
        }
    }

    /// Exponential backoff capped at `max_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier: 2,
        }
    }

    /// Call `check` until it returns `true` or the attempts run out.
    ///
    /// Errors from `check` abort the poll and are returned as-is.
    pub async fn poll_until<F, Fut>(&self, mut check: F) -> Result<PollOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay;

        for attempt in 1..=attempts {
            if check().await? {
                return Ok(PollOutcome::Ready { attempts: attempt });
            }
            if attempt < attempts {
                tokio::time::sleep(delay.min(self.max_delay)).await;
                delay = delay.saturating_mul(self.multiplier.max(1));
            }
        }

        Ok(PollOutcome::TimedOut { attempts })
    }
}

/// Result of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition held after `attempts` checks.
    Ready { attempts: u32 },
    /// The condition never held.
    TimedOut { attempts: u32 },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}
