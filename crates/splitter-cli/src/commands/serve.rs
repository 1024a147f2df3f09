use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use splitter_core::{Splitter, SystemClock};
use splitter_server::AppState;

use super::EngineArgs;

pub fn run(
    db: Option<&Path>,
    host: &str,
    port: u16,
    request_timeout_sec: u64,
    engine: &EngineArgs,
) -> anyhow::Result<()> {
    let pool = super::make_pool(engine)?;
    let config = engine.splitter_config();

    let base = format!("http://{host}:{port}");
    println!("🌌 Universe Splitter v{}", splitter_core::VERSION);
    println!("   {base}");
    println!("   sources: {}", pool.source_names().join(", "));
    match db {
        Some(path) => println!("   store:   {}", path.display()),
        None => println!("   store:   in-memory"),
    }
    println!(
        "   freshness window {}s, poll {}ms, request timeout {request_timeout_sec}s",
        config.freshness_window.as_secs(),
        config.poll_interval.as_millis()
    );
    println!();
    println!("   Endpoints:");
    println!("     POST /api/v1/split    Split once per idempotency id");
    println!("     GET  /stats           Operation and replay counters");
    println!("     GET  /health          Per-source health");
    println!("     GET  /                API index (try: curl {base})");
    println!();
    println!("   Example:");
    println!(
        "     curl -X POST {base}/api/v1/split -H 'content-type: application/json' -d '{{\"idempotency_id\":\"my-decision\"}}'"
    );
    println!();

    let rt = super::runtime()?;
    rt.block_on(async {
        let store = super::open_store(db).await?;
        let splitter =
            Arc::new(Splitter::new(store, Arc::new(SystemClock), pool.clone()).with_config(config));
        let state = AppState::new(splitter, pool)
            .with_request_timeout(Duration::from_secs(request_timeout_sec));
        splitter_server::run_server(state, host, port)
            .await
            .with_context(|| format!("server on {host}:{port} failed"))
    })
}
