//! Persistent operation store with optimistic locking.
//!
//! # Save contract
//!
//! | stored record | caller's `lock`      | outcome                                            |
//! |---------------|----------------------|----------------------------------------------------|
//! | absent        | empty                | created, fresh lock written back to the caller     |
//! | absent        | non-empty            | [`StoreError::NotFound`], nothing written          |
//! | present       | equal to stored lock | overwritten, fresh lock written back to the caller |
//! | present       | anything else        | [`StoreError::LockConflict`], caller's copy replaced by the stored record |
//!
//! The store never stamps time; `created`/`updated` are the caller's.
//! Every engine must behave identically; `contract` tests run against each.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::operation::{Counters, Operation};

/// Key of the single global counters record.
pub const GLOBAL_COUNTERS_ID: &str = "global";

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Create or conditionally update `op`. See the module docs for the
    /// lock protocol.
    async fn save(&self, op: &mut Operation) -> Result<(), StoreError>;

    /// Read the current record for `id`, if any.
    async fn load(&self, id: &str) -> Result<Option<Operation>, StoreError>;

    /// Atomically add each delta to the global counter set.
    async fn increment_counters(&self, deltas: &Counters) -> Result<(), StoreError>;

    /// The global counter set. Absent counters read as zero.
    async fn read_counters(&self) -> Result<Counters, StoreError>;
}
