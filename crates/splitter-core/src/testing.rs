//! Deterministic entropy sources for tests and offline runs.
//!
//! Paired with [`MemoryStore`](crate::store::MemoryStore) and
//! [`ManualClock`](crate::clock::ManualClock) these let the whole split path
//! run without network or wall-clock dependencies.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::source::{EntropySource, Sample};

/// Always returns the same value, tagged with its name.
#[derive(Debug)]
pub struct StaticSource {
    name: String,
    value: i64,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer only after `delay` (cancellable).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times `get_random` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntropySource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_random(&self, cancel: &CancellationToken) -> Result<Sample, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(Sample::new(self.value, self.name.clone()))
    }
}

/// Returns `start + 1`, `start + 2`, ... on successive calls, tagged `"test"`.
#[derive(Debug)]
pub struct SequenceSource {
    next: AtomicI64,
    calls: AtomicUsize,
}

impl SequenceSource {
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntropySource for SequenceSource {
    fn name(&self) -> &str {
        "test"
    }

    async fn get_random(&self, _cancel: &CancellationToken) -> Result<Sample, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = self.next.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        Ok(Sample::new(value, "test"))
    }
}

/// Always fails with [`SourceError::Unavailable`].
#[derive(Debug)]
pub struct FailingSource {
    name: String,
    calls: AtomicUsize,
}

impl FailingSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntropySource for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_random(&self, _cancel: &CancellationToken) -> Result<Sample, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SourceError::Unavailable {
            provider: self.name.clone(),
            reason: "simulated outage".to_string(),
        })
    }
}

/// Never answers; returns only once cancelled.
#[derive(Debug)]
pub struct HangingSource {
    name: String,
}

impl HangingSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EntropySource for HangingSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_random(&self, cancel: &CancellationToken) -> Result<Sample, SourceError> {
        cancel.cancelled().await;
        Err(SourceError::Cancelled)
    }
}
