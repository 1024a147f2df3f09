use std::path::Path;

use anyhow::Context;

use splitter_core::OperationStore;

pub fn run(db: Option<&Path>) -> anyhow::Result<()> {
    let rt = super::runtime()?;
    let counters = rt.block_on(async {
        let store = super::open_store(db).await?;
        store
            .read_counters()
            .await
            .context("cannot read counters")
    })?;
    println!("{}", serde_json::to_string_pretty(&counters)?);
    Ok(())
}
