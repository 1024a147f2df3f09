//! Abstract entropy source trait.
//!
//! Every provider implements [`EntropySource`], yielding one 64-bit sample and
//! a provenance tag per call. Providers may fail; the
//! [`EntropyPool`](crate::pool::EntropyPool) absorbs individual failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

/// One entropy sample and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub value: i64,
    /// Provenance tag, e.g. `"ANU"` or `"ANU,ETHZ"` for a combined sample.
    pub descriptor: String,
}

impl Sample {
    pub fn new(value: i64, descriptor: impl Into<String>) -> Self {
        Self {
            value,
            descriptor: descriptor.into(),
        }
    }
}

/// Trait that every entropy provider must implement.
#[async_trait]
pub trait EntropySource: Send + Sync {
    /// Short provider name used in logs and health reports.
    fn name(&self) -> &str;

    /// Produce one sample. Implementations must return promptly with
    /// [`SourceError::Cancelled`] once `cancel` fires.
    async fn get_random(&self, cancel: &CancellationToken) -> Result<Sample, SourceError>;
}
