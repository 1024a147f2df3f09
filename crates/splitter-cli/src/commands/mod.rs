pub mod serve;
pub mod split;
pub mod stats;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use log::warn;

use splitter_core::sources::{DEFAULT_SOURCES, build_sources};
use splitter_core::{EntropyPool, MemoryStore, OperationStore, SplitterConfig, SqliteStore};

/// Flags shared by every command that actually splits.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Comma-separated entropy providers: anu, ethz, nist
    #[arg(long, default_value_t = DEFAULT_SOURCES.join(","))]
    pub sources: String,

    /// ANU quantum numbers API key (required when `anu` is selected)
    #[arg(long, env = "ANU_KEY", hide_env_values = true)]
    pub anu_key: Option<String>,

    /// Seconds an in-flight operation may go quiet before another caller takes it over
    #[arg(long, default_value = "10")]
    pub freshness_sec: u64,

    /// Milliseconds between polls while awaiting another caller
    #[arg(long, default_value = "500")]
    pub poll_ms: u64,
}

impl EngineArgs {
    pub fn splitter_config(&self) -> SplitterConfig {
        SplitterConfig {
            freshness_window: Duration::from_secs(self.freshness_sec),
            poll_interval: Duration::from_millis(self.poll_ms),
        }
    }
}

/// Split a comma-separated provider list, dropping blanks.
pub fn parse_sources(list: &str) -> Vec<&str> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Build the entropy pool named by `args`.
pub fn make_pool(args: &EngineArgs) -> anyhow::Result<Arc<EntropyPool>> {
    let names = parse_sources(&args.sources);
    let sources = build_sources(&names, args.anu_key.as_deref())
        .with_context(|| format!("cannot build entropy sources from {:?}", args.sources))?;
    Ok(Arc::new(EntropyPool::with_sources(sources)))
}

/// Open the SQLite store at `db`, or an in-memory store when no path is given.
pub async fn open_store(db: Option<&Path>) -> anyhow::Result<Arc<dyn OperationStore>> {
    match db {
        Some(path) => {
            let store = SqliteStore::open(path)
                .await
                .with_context(|| format!("cannot open operation store {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("no --db given; operations are kept in memory and lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("cannot start tokio runtime")
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitter_core::Operation;

    fn engine(sources: &str, anu_key: Option<&str>) -> EngineArgs {
        EngineArgs {
            sources: sources.to_string(),
            anu_key: anu_key.map(str::to_string),
            freshness_sec: 10,
            poll_ms: 500,
        }
    }

    // -----------------------------------------------------------------------
    // parse_sources tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_sources_trims_and_drops_blanks() {
        assert_eq!(parse_sources(" anu, ethz ,,nist "), vec!["anu", "ethz", "nist"]);
    }

    #[test]
    fn test_parse_sources_empty() {
        assert!(parse_sources("").is_empty());
        assert!(parse_sources(" , ").is_empty());
    }

    // -----------------------------------------------------------------------
    // make_pool tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_make_pool_from_names() {
        let pool = make_pool(&engine("ethz,nist", None)).unwrap();
        assert_eq!(pool.source_names(), vec!["ETHZ", "NIST"]);
    }

    #[test]
    fn test_make_pool_anu_needs_key() {
        let err = make_pool(&engine("anu", None)).unwrap_err();
        assert!(format!("{err:#}").contains("api key"));
        assert_eq!(make_pool(&engine("anu", Some("k"))).unwrap().source_count(), 1);
    }

    #[test]
    fn test_make_pool_rejects_unknown_and_empty() {
        assert!(make_pool(&engine("dice", None)).is_err());
        assert!(make_pool(&engine("", None)).is_err());
    }

    #[test]
    fn test_splitter_config_from_flags() {
        let mut args = engine("ethz", None);
        args.freshness_sec = 3;
        args.poll_ms = 50;
        let config = args.splitter_config();
        assert_eq!(config.freshness_window, Duration::from_secs(3));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    // -----------------------------------------------------------------------
    // open_store tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_open_store_sqlite_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.db");
        {
            let store = open_store(Some(&path)).await.unwrap();
            let mut op = Operation::new("cli", chrono::Utc::now());
            store.save(&mut op).await.unwrap();
        }
        let store = open_store(Some(&path)).await.unwrap();
        assert!(store.load("cli").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_store_defaults_to_memory() {
        let store = open_store(None).await.unwrap();
        assert!(store.load("nothing").await.unwrap().is_none());
    }
}
