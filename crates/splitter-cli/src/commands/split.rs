use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::info;
use tokio_util::sync::CancellationToken;

use splitter_core::{Splitter, SystemClock};

use super::EngineArgs;

pub fn run(
    db: Option<&Path>,
    id: Option<String>,
    timeout_sec: u64,
    engine: &EngineArgs,
) -> anyhow::Result<()> {
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let pool = super::make_pool(engine)?;

    let rt = super::runtime()?;
    let outcome = rt.block_on(async {
        let store = super::open_store(db).await?;
        let splitter = Splitter::new(store, Arc::new(SystemClock), pool)
            .with_config(engine.splitter_config());

        // Cancel on timeout or Ctrl-C.
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let deadline = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(timeout_sec)) => {}
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
            trigger.cancel();
        });

        let outcome = splitter.split(&id, &cancel).await;
        deadline.abort();
        outcome.with_context(|| format!("split {id} failed"))
    })?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
