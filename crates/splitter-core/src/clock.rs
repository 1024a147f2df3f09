//! Time as an injected capability.
//!
//! The orchestrator never reads the wall clock or sleeps directly, so its
//! freshness window and poll interval can be driven deterministically in tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration`, or fail with [`Cancelled`] as soon as `cancel` fires.
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled>;
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Test clock whose time only moves when told to.
///
/// `sleep` returns immediately after yielding to the scheduler, unless the
/// token is already cancelled. When `advance_on_sleep` is set, each sleep also
/// moves the clock forward by the slept duration.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    advance_on_sleep: bool,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            advance_on_sleep: false,
        }
    }

    /// Clock whose sleeps advance time by the slept duration.
    pub fn advancing(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            advance_on_sleep: true,
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if self.advance_on_sleep {
            self.advance(duration);
        }
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }
}
