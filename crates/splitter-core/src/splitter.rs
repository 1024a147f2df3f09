//! The idempotent split orchestrator.
//!
//! [`Splitter::split`] turns an idempotency id into exactly one recorded
//! random value:
//!
//! 1. **Admit**: save a fresh record with an empty lock. Success means this
//!    caller owns it. A lock conflict means the id was seen before: a complete
//!    record is replayed, anything else is awaited.
//! 2. **Await**: poll the record while it is incomplete and its `updated`
//!    stamp is inside the freshness window. A record that goes stale is
//!    treated as abandoned and re-driven with the latest known lock.
//! 3. **Drive**: mark the record `Started`, acquire entropy once, record the
//!    result and mark it `Complete`.
//!
//! Every blocking point (store I/O, poll sleep, entropy fan-in) honors the
//! caller's [`CancellationToken`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{Cancelled, SplitError, StoreError};
use crate::operation::{Counters, OPERATION_COUNT, Operation, OperationStatus, REPLAY_COUNT};
use crate::source::EntropySource;
use crate::store::OperationStore;

/// Timing knobs of the await loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// How long an in-flight record may go without an update before another
    /// caller takes it over.
    pub freshness_window: Duration,
    /// Delay between polls while awaiting someone else's flight.
    pub poll_interval: Duration,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What a caller gets back from a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutcome {
    pub idempotency_id: String,
    pub result: i64,
    pub source_description: String,
    pub before: DateTime<Utc>,
    pub after: DateTime<Utc>,
}

impl SplitOutcome {
    fn from_operation(op: &Operation) -> Self {
        Self {
            idempotency_id: op.id.clone(),
            result: op.result,
            source_description: op.source_description.clone(),
            before: op.before.unwrap_or(op.updated),
            after: op.completed.unwrap_or(op.updated),
        }
    }
}

/// How a drive attempt ended.
enum Drive {
    /// We wrote the completed record.
    Completed,
    /// Someone else completed the record first; `op` now holds theirs.
    Superseded,
    /// Someone else wrote the record before we marked it started; `op` now
    /// holds their view.
    LostOwnership,
}

/// Idempotent split orchestrator. Cheap to share behind an `Arc`; holds no
/// per-request state.
pub struct Splitter {
    store: Arc<dyn OperationStore>,
    clock: Arc<dyn Clock>,
    source: Arc<dyn EntropySource>,
    config: SplitterConfig,
}

impl Splitter {
    pub fn new(
        store: Arc<dyn OperationStore>,
        clock: Arc<dyn Clock>,
        source: Arc<dyn EntropySource>,
    ) -> Self {
        Self {
            store,
            clock,
            source,
            config: SplitterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SplitterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// Produce (or replay) the random value recorded for `id`.
    pub async fn split(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<SplitOutcome, SplitError> {
        if id.is_empty() {
            return Err(SplitError::EmptyId);
        }

        let mut op = Operation::new(id, self.clock.now());
        let mut owned = match unless_cancelled(cancel, self.store.save(&mut op)).await? {
            Ok(()) => {
                debug!("admitted operation {id}");
                true
            }
            Err(err) if err.is_lock_conflict() => false,
            Err(err) => return Err(err.into()),
        };

        loop {
            if op.is_complete() {
                debug!("replaying completed operation {id}");
                self.bump(REPLAY_COUNT, cancel).await;
                return Ok(SplitOutcome::from_operation(&op));
            }

            if !owned {
                debug!("operation {id} is {}; awaiting its owner", op.status);
                self.await_flight(&mut op, cancel).await?;
                if op.is_complete() {
                    continue;
                }
                warn!(
                    "operation {id} not updated since {}; taking it over",
                    op.updated
                );
            }

            match self.drive(&mut op, cancel).await? {
                Drive::Completed => {
                    info!(
                        "completed operation {id} from {}",
                        op.source_description
                    );
                    self.bump(OPERATION_COUNT, cancel).await;
                    return Ok(SplitOutcome::from_operation(&op));
                }
                Drive::Superseded => continue,
                Drive::LostOwnership => {
                    debug!("lost ownership of operation {id}");
                    owned = false;
                }
            }
        }
    }

    /// Poll `op` until it completes or stops being fresh.
    async fn await_flight(
        &self,
        op: &mut Operation,
        cancel: &CancellationToken,
    ) -> Result<(), SplitError> {
        while !op.is_complete() && self.is_fresh(op) {
            self.clock.sleep(self.config.poll_interval, cancel).await?;
            match unless_cancelled(cancel, self.store.load(&op.id)).await?? {
                Some(current) => *op = current,
                None => return Err(StoreError::NotFound { id: op.id.clone() }.into()),
            }
        }
        Ok(())
    }

    fn is_fresh(&self, op: &Operation) -> bool {
        let window = TimeDelta::from_std(self.config.freshness_window).unwrap_or(TimeDelta::MAX);
        self.clock.now().signed_duration_since(op.updated) < window
    }

    async fn drive(
        &self,
        op: &mut Operation,
        cancel: &CancellationToken,
    ) -> Result<Drive, SplitError> {
        let before = self.clock.now();
        op.before = Some(before);
        op.updated = before;
        op.status = OperationStatus::Started;
        match unless_cancelled(cancel, self.store.save(op)).await? {
            Ok(()) => {}
            Err(err) if err.is_lock_conflict() => return Ok(Drive::LostOwnership),
            Err(err) => return Err(err.into()),
        }

        let sample = self.source.get_random(cancel).await?;

        let completed = self.clock.now();
        op.result = sample.value;
        op.source_description = sample.descriptor;
        op.completed = Some(completed);
        op.updated = completed;
        op.status = OperationStatus::Complete;
        match unless_cancelled(cancel, self.store.save(op)).await? {
            Ok(()) => Ok(Drive::Completed),
            Err(err) if err.is_lock_conflict() && op.is_complete() => {
                warn!(
                    "operation {} was completed elsewhere; discarding local sample",
                    op.id
                );
                Ok(Drive::Superseded)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Counter updates are best effort; a cancelled caller skips them.
    async fn bump(&self, name: &str, cancel: &CancellationToken) {
        let deltas = Counters::new().with(name, 1);
        match unless_cancelled(cancel, self.store.increment_counters(&deltas)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("failed to increment {name}: {err}"),
            Err(Cancelled) => debug!("cancelled before incrementing {name}"),
        }
    }
}

async fn unless_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}
