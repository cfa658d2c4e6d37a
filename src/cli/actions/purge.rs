use anyhow::Result;
use tracing::info;

use super::EngineArgs;

#[derive(Debug)]
pub struct Args {
    pub engine: EngineArgs,
}

/// Run a single cleanup cycle and print its outcome.
/// # Errors
/// Returns an error if the store scan or delete fails.
pub async fn execute(args: Args) -> Result<()> {
    let manager = args.engine.open().await;
    let outcome = manager.purge_now().await;
    manager.close().await;
    let outcome = outcome?;
    info!(removed = outcome.removed, scanned = outcome.scanned, "purge finished");
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}
