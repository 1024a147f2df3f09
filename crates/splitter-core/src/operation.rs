//! The durable split record and the global counter set.
//!
//! One [`Operation`] exists per idempotency id. Its `lock` is an optimistic
//! concurrency token that the store rewrites on every successful save; its
//! `status` only ever moves forward through [`OperationStatus`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counter incremented each time an operation is driven to completion.
pub const OPERATION_COUNT: &str = "OperationCount";
/// Counter incremented each time a completed operation is served again.
pub const REPLAY_COUNT: &str = "ReplayCount";

/// Lifecycle of an operation. Ordered: `NotStarted < Started < Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Admitted but entropy acquisition has not begun.
    #[default]
    NotStarted,
    /// Entropy acquisition in progress (or abandoned mid-flight).
    Started,
    /// Result recorded; immutable from here on.
    Complete,
}

impl OperationStatus {
    /// Stable integer encoding used by durable stores.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::NotStarted => 0,
            Self::Started => 1,
            Self::Complete => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::NotStarted),
            1 => Some(Self::Started),
            2 => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Started => write!(f, "started"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A single split operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Caller-supplied idempotency id. Never changes after creation.
    pub id: String,
    /// Optimistic lock. Empty until the first successful save.
    pub lock: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Sampled immediately before entropy acquisition.
    pub before: Option<DateTime<Utc>>,
    /// Sampled immediately after entropy acquisition.
    pub completed: Option<DateTime<Utc>>,
    pub status: OperationStatus,
    /// Combined random value; meaningful only once `status` is `Complete`.
    pub result: i64,
    /// Provenance of `result`; meaningful only once `status` is `Complete`.
    pub source_description: String,
}

impl Operation {
    /// A fresh, unsaved operation for `id` with `created = updated = now`.
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            lock: String::new(),
            created: now,
            updated: now,
            before: None,
            completed: None,
            status: OperationStatus::NotStarted,
            result: 0,
            source_description: String::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == OperationStatus::Complete
    }
}

/// Named monotonically increasing counters.
///
/// Absent counters read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counters(BTreeMap<String, u64>);

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style single counter, handy for delta sets.
    pub fn with(mut self, name: impl Into<String>, value: u64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// Add `delta` to `name`, saturating at `u64::MAX`.
    pub fn add(&mut self, name: &str, delta: u64) {
        let slot = self.0.entry(name.to_string()).or_insert(0);
        *slot = slot.saturating_add(delta);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, u64)> for Counters {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_forward_only() {
        assert!(OperationStatus::NotStarted < OperationStatus::Started);
        assert!(OperationStatus::Started < OperationStatus::Complete);
    }

    #[test]
    fn status_integer_encoding_round_trips() {
        for status in [
            OperationStatus::NotStarted,
            OperationStatus::Started,
            OperationStatus::Complete,
        ] {
            assert_eq!(OperationStatus::from_i64(status.as_i64()), Some(status));
        }
        assert_eq!(OperationStatus::from_i64(7), None);
    }

    #[test]
    fn new_operation_is_unsaved() {
        let now = Utc::now();
        let op = Operation::new("abc", now);
        assert_eq!(op.id, "abc");
        assert!(op.lock.is_empty());
        assert_eq!(op.created, now);
        assert_eq!(op.updated, now);
        assert_eq!(op.status, OperationStatus::NotStarted);
        assert!(op.before.is_none() && op.completed.is_none());
    }

    #[test]
    fn counters_default_to_zero() {
        let counters = Counters::new().with(OPERATION_COUNT, 3);
        assert_eq!(counters.get(OPERATION_COUNT), 3);
        assert_eq!(counters.get(REPLAY_COUNT), 0);
    }

    #[test]
    fn counters_add_saturates() {
        let mut counters = Counters::new().with("n", u64::MAX - 1);
        counters.add("n", 5);
        assert_eq!(counters.get("n"), u64::MAX);
        counters.add("m", 2);
        assert_eq!(counters.get("m"), 2);
        assert_eq!(counters.len(), 2);
    }
}
