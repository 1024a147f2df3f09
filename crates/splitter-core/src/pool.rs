//! Multi-source entropy pool with health monitoring.
//!
//! Architecture:
//! 1. Fan a request out to every registered source concurrently
//! 2. Wait for every outcome (no short-circuit on the first success)
//! 3. XOR-combine the successful samples
//! 4. Sort and comma-join the successful descriptors
//! 5. Graceful degradation when sources fail
//! 6. Per-source health bookkeeping
//! 7. Cancellation aborts all outstanding source tasks

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::source::{EntropySource, Sample};

/// Runtime bookkeeping for a registered source.
#[derive(Debug, Default)]
struct SourceStats {
    successes: u64,
    failures: u64,
    last_latency: Duration,
    last_error: Option<String>,
    healthy: bool,
}

struct PoolEntry {
    source: Arc<dyn EntropySource>,
    stats: Mutex<SourceStats>,
}

/// Concurrent multi-source entropy pool.
///
/// The pool is itself an [`EntropySource`]: its sample is the XOR of every
/// successful member sample, and its descriptor the sorted, comma-joined
/// member descriptors. Both are independent of completion order.
pub struct EntropyPool {
    sources: Vec<PoolEntry>,
}

impl std::fmt::Debug for EntropyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyPool")
            .field("sources", &self.source_names())
            .finish()
    }
}

impl EntropyPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Create a pool from a list of sources.
    pub fn with_sources(sources: impl IntoIterator<Item = Arc<dyn EntropySource>>) -> Self {
        let mut pool = Self::new();
        for source in sources {
            pool.add_source(source);
        }
        pool
    }

    /// Register an entropy source.
    pub fn add_source(&mut self, source: Arc<dyn EntropySource>) {
        self.sources.push(PoolEntry {
            source,
            stats: Mutex::new(SourceStats {
                healthy: true,
                ..SourceStats::default()
            }),
        });
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|e| e.source.name().to_string())
            .collect()
    }

    fn record(&self, index: usize, elapsed: Duration, outcome: Result<(), &SourceError>) {
        let Some(entry) = self.sources.get(index) else {
            return;
        };
        let mut stats = entry.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.last_latency = elapsed;
        match outcome {
            Ok(()) => {
                stats.successes += 1;
                stats.healthy = true;
                stats.last_error = None;
            }
            Err(err) => {
                stats.failures += 1;
                stats.healthy = false;
                stats.last_error = Some(err.to_string());
            }
        }
    }

    /// Health report as structured data.
    pub fn health_report(&self) -> HealthReport {
        let sources: Vec<SourceHealth> = self
            .sources
            .iter()
            .map(|entry| {
                let stats = entry.stats.lock().unwrap_or_else(PoisonError::into_inner);
                SourceHealth {
                    name: entry.source.name().to_string(),
                    healthy: stats.healthy,
                    successes: stats.successes,
                    failures: stats.failures,
                    last_latency_ms: stats.last_latency.as_secs_f64() * 1000.0,
                    last_error: stats.last_error.clone(),
                }
            })
            .collect();
        HealthReport {
            healthy: sources.iter().filter(|s| s.healthy).count(),
            total: sources.len(),
            sources,
        }
    }
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntropySource for EntropyPool {
    fn name(&self) -> &str {
        "pool"
    }

    async fn get_random(&self, cancel: &CancellationToken) -> Result<Sample, SourceError> {
        if self.sources.is_empty() {
            return Err(SourceError::NoSources);
        }

        // Children observe the caller's token and are cancelled when we return,
        // whichever happens first.
        let children = cancel.child_token();
        let _abort_children = children.clone().drop_guard();

        let mut tasks = JoinSet::new();
        for (index, entry) in self.sources.iter().enumerate() {
            let source = Arc::clone(&entry.source);
            let token = children.clone();
            tasks.spawn(async move {
                let t0 = Instant::now();
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(SourceError::Cancelled),
                    out = source.get_random(&token) => out,
                };
                (index, t0.elapsed(), outcome)
            });
        }

        let mut succeeded: Vec<Sample> = Vec::with_capacity(self.sources.len());
        let mut failed: Vec<SourceError> = Vec::new();

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(SourceError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                Some(Ok((index, elapsed, Ok(sample)))) => {
                    debug!(
                        "entropy source {} answered in {:.1}ms",
                        sample.descriptor,
                        elapsed.as_secs_f64() * 1000.0
                    );
                    self.record(index, elapsed, Ok(()));
                    succeeded.push(sample);
                }
                Some(Ok((index, elapsed, Err(err)))) => {
                    warn!("entropy source {} failed: {err}", self.sources[index].source.name());
                    self.record(index, elapsed, Err(&err));
                    failed.push(err);
                }
                Some(Err(join_err)) => {
                    warn!("entropy source task failed: {join_err}");
                    failed.push(SourceError::TaskFailed(join_err.to_string()));
                }
                None => break,
            }
        }

        if succeeded.is_empty() {
            return match failed.into_iter().next() {
                Some(err) => Err(err),
                None => unreachable!("every pool task reports an outcome"),
            };
        }

        Ok(combine(succeeded))
    }
}

/// XOR the values and sort-join the descriptors.
fn combine(samples: Vec<Sample>) -> Sample {
    let value = samples.iter().fold(0i64, |acc, s| acc ^ s.value);
    let mut descriptors: Vec<String> = samples.into_iter().map(|s| s.descriptor).collect();
    descriptors.sort();
    Sample {
        value,
        descriptor: descriptors.join(","),
    }
}

/// Overall health report for the entropy pool.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Number of sources whose last call succeeded (or that were never called).
    pub healthy: usize,
    /// Total number of registered sources.
    pub total: usize,
    /// Per-source health details.
    pub sources: Vec<SourceHealth>,
}

/// Health status of a single entropy source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub name: String,
    /// Whether the last call succeeded.
    pub healthy: bool,
    pub successes: u64,
    pub failures: u64,
    /// Duration of the last call in milliseconds.
    pub last_latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingSource, HangingSource, StaticSource};

    fn pool_of(sources: Vec<Arc<dyn EntropySource>>) -> EntropyPool {
        EntropyPool::with_sources(sources)
    }

    // -----------------------------------------------------------------------
    // Combination
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_two_sources_xor_and_sorted_descriptor() {
        let pool = pool_of(vec![
            Arc::new(StaticSource::new("B", 0x0000_0000_0000_FF00)),
            Arc::new(StaticSource::new("A", 0x0000_0000_0000_00FF)),
        ]);
        let sample = pool.get_random(&CancellationToken::new()).await.unwrap();
        assert_eq!(sample.value, 0x0000_0000_0000_FFFF);
        assert_eq!(sample.descriptor, "A,B");
    }

    #[tokio::test]
    async fn test_three_sources_independent_of_completion_order() {
        let (a, b, c) = (0x1234_i64, -0x0F0F_0F0F_i64, 0x7FFF_0000_0000_0001_i64);
        let pool = pool_of(vec![
            Arc::new(StaticSource::new("gamma", c).with_delay(Duration::from_millis(1))),
            Arc::new(StaticSource::new("alpha", a).with_delay(Duration::from_millis(30))),
            Arc::new(StaticSource::new("beta", b)),
        ]);
        let sample = pool.get_random(&CancellationToken::new()).await.unwrap();
        assert_eq!(sample.value, a ^ b ^ c);
        assert_eq!(sample.descriptor, "alpha,beta,gamma");
    }

    #[tokio::test]
    async fn test_every_source_is_called_once() {
        let a = Arc::new(StaticSource::new("A", 1));
        let b = Arc::new(StaticSource::new("B", 2));
        let pool = pool_of(vec![a.clone(), b.clone()]);
        pool.get_random(&CancellationToken::new()).await.unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    // -----------------------------------------------------------------------
    // Degradation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_partial_failure_uses_survivors_only() {
        let pool = pool_of(vec![
            Arc::new(StaticSource::new("A", 0xF0)),
            Arc::new(FailingSource::new("broken")),
            Arc::new(StaticSource::new("C", 0x0F)),
        ]);
        let sample = pool.get_random(&CancellationToken::new()).await.unwrap();
        assert_eq!(sample.value, 0xFF);
        assert_eq!(sample.descriptor, "A,C");
    }

    #[tokio::test]
    async fn test_total_failure_surfaces_a_source_error() {
        let pool = pool_of(vec![
            Arc::new(FailingSource::new("x")),
            Arc::new(FailingSource::new("y")),
        ]);
        let err = pool.get_random(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_empty_pool_fails() {
        let err = EntropyPool::new()
            .get_random(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NoSources));
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_hung_source_is_abandoned_on_cancel() {
        let pool = pool_of(vec![
            Arc::new(StaticSource::new("A", 1)),
            Arc::new(HangingSource::new("stuck")),
        ]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = pool.get_random(&cancel).await.unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
    }

    #[tokio::test]
    async fn test_pre_cancelled_request_fails_fast() {
        let pool = pool_of(vec![Arc::new(HangingSource::new("stuck"))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pool.get_random(&cancel).await.unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_health_report_tracks_failures() {
        let pool = pool_of(vec![
            Arc::new(StaticSource::new("good", 1)),
            Arc::new(FailingSource::new("bad")),
        ]);
        let before = pool.health_report();
        assert_eq!(before.healthy, 2);
        assert_eq!(before.total, 2);

        pool.get_random(&CancellationToken::new()).await.unwrap();
        let report = pool.health_report();
        assert_eq!(report.healthy, 1);
        let bad = report.sources.iter().find(|s| s.name == "bad").unwrap();
        assert!(!bad.healthy);
        assert_eq!(bad.failures, 1);
        assert!(bad.last_error.is_some());
        let good = report.sources.iter().find(|s| s.name == "good").unwrap();
        assert_eq!(good.successes, 1);
    }

    #[test]
    fn test_source_names_in_registration_order() {
        let pool = pool_of(vec![
            Arc::new(StaticSource::new("ANU", 1)),
            Arc::new(StaticSource::new("ETHZ", 2)),
        ]);
        assert_eq!(pool.source_names(), vec!["ANU", "ETHZ"]);
        assert_eq!(pool.source_count(), 2);
    }
}
