use anyhow::Result;

use super::EngineArgs;
use crate::intruder::record::RecordType;

#[derive(Debug)]
pub struct Args {
    pub engine: EngineArgs,
    pub filter: Option<RecordType>,
    pub limit: usize,
}

/// Print live records as JSON lines.
/// # Errors
/// Returns an error if the store scan fails.
pub async fn execute(args: Args) -> Result<()> {
    let manager = args.engine.open().await;
    let reports = manager.records(args.filter, args.limit).await;
    manager.close().await;
    for report in reports? {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}
