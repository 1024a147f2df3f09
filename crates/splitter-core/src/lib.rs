//! # splitter-core
//!
//! **Split the universe, exactly once per request.**
//!
//! `splitter-core` records one quantum-random value per caller-supplied
//! idempotency id. Retried or concurrent calls with the same id converge on
//! the single stored result instead of sampling again.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use splitter_core::{EntropyPool, MemoryStore, Splitter, SystemClock, sources};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = EntropyPool::with_sources(sources::build_sources(&["ethz"], None)?);
//! let splitter = Splitter::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     Arc::new(pool),
//! );
//!
//! let outcome = splitter.split("request-42", &CancellationToken::new()).await?;
//! println!("{} from {}", outcome.result, outcome.source_description);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Sources → Pool (XOR) → Splitter → Store
//!
//! - [`EntropySource`]: one sample plus a provenance tag per call.
//! - [`EntropyPool`]: concurrent fan-out to every source, XOR of the survivors.
//! - [`OperationStore`]: create-if-absent / update-if-lock-matches persistence
//!   ([`MemoryStore`], [`SqliteStore`]).
//! - [`Clock`]: time and cancellable sleep, injected.
//! - [`Splitter`]: admit, await, drive, respond.

pub mod clock;
pub mod error;
pub mod lock;
pub mod operation;
pub mod pool;
pub mod source;
pub mod sources;
pub mod splitter;
pub mod store;
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Cancelled, SourceError, SplitError, StoreError};
pub use lock::LockGenerator;
pub use operation::{Counters, OPERATION_COUNT, Operation, OperationStatus, REPLAY_COUNT};
pub use pool::{EntropyPool, HealthReport, SourceHealth};
pub use source::{EntropySource, Sample};
pub use sources::RestSource;
pub use splitter::{SplitOutcome, Splitter, SplitterConfig};
pub use store::{GLOBAL_COUNTERS_ID, MemoryStore, OperationStore, SqliteStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
