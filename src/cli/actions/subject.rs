//! One-shot `check`, `mark` and `clear` against the configured store.

use anyhow::Result;
use serde::Serialize;

use super::EngineArgs;
use crate::intruder::error::IntruderError;
use crate::intruder::record::RecordType;
use crate::intruder::{IntruderManager, RecordReport};

#[derive(Debug)]
pub struct Args {
    pub engine: EngineArgs,
    pub record_type: RecordType,
    pub subject: String,
}

#[derive(Debug, Serialize)]
struct Outcome<'a> {
    #[serde(rename = "type")]
    record_type: RecordType,
    subject: &'a str,
    tracked: bool,
    locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<RecordReport>,
}

/// # Errors
/// Returns an error if the store fails.
pub async fn check(args: Args) -> Result<()> {
    let manager = args.engine.open().await;
    let result = manager.check(args.record_type, &args.subject).await;
    report(&manager, &args, result).await
}

/// # Errors
/// Returns an error if the attempt cannot be persisted.
pub async fn mark(args: Args) -> Result<()> {
    let manager = args.engine.open().await;
    let result = manager.mark(args.record_type, &args.subject).await;
    report(&manager, &args, result).await
}

/// # Errors
/// Returns an error if the record cannot be removed.
pub async fn clear(args: Args) -> Result<()> {
    let manager = args.engine.open().await;
    let result = manager.clear(args.record_type, &args.subject).await;
    report(&manager, &args, result).await
}

async fn report(
    manager: &IntruderManager,
    args: &Args,
    result: Result<(), IntruderError>,
) -> Result<()> {
    let locked = match result {
        Ok(()) => false,
        Err(err) if err.is_locked() => true,
        Err(err) => {
            manager.close().await;
            return Err(err.into());
        }
    };
    let record = manager.record(args.record_type, &args.subject).await?;
    let outcome = Outcome {
        record_type: args.record_type,
        subject: &args.subject,
        tracked: manager.is_tracking(args.record_type),
        locked,
        record,
    };
    println!("{}", serde_json::to_string(&outcome)?);
    manager.close().await;
    Ok(())
}
