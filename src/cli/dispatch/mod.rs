//! Map validated CLI matches to an [`Action`].

use crate::cli::actions::{purge, records, serve, subject, Action, EngineArgs};
use crate::cli::commands::{
    cleanup, penalty, policy, storage, ARG_LIMIT, ARG_RECORD_TYPE, ARG_STATS_INTERVAL_SECONDS,
    ARG_SUBJECT, CMD_CHECK, CMD_CLEAR, CMD_MARK, CMD_PURGE, CMD_RECORDS, CMD_SERVE,
};
use crate::intruder::config::IntruderConfig;
use crate::intruder::record::RecordType;
use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use std::time::Duration;

fn engine_args(matches: &ArgMatches) -> Result<EngineArgs> {
    let storage = storage::Options::parse(matches)?;
    let config = policy::Options::parse(matches)
        .apply(IntruderConfig::new())
        .with_delay(penalty::Options::parse(matches).delay)
        .with_cleanup(cleanup::Options::parse(matches).cleanup);

    Ok(EngineArgs {
        config,
        storage: storage.settings,
    })
}

fn subject_args(matches: &ArgMatches, engine: EngineArgs) -> Result<subject::Args> {
    let record_type = matches
        .get_one::<RecordType>(ARG_RECORD_TYPE)
        .copied()
        .context("missing required argument: <type>")?;
    let subject = matches
        .get_one::<String>(ARG_SUBJECT)
        .cloned()
        .context("missing required argument: <subject>")?;
    Ok(subject::Args {
        engine,
        record_type,
        subject,
    })
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let (name, sub) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("missing subcommand"))?;
    let engine = engine_args(sub)?;

    match name {
        CMD_SERVE => Ok(Action::Serve(serve::Args {
            engine,
            stats_interval: Duration::from_secs(
                sub.get_one::<u64>(ARG_STATS_INTERVAL_SECONDS)
                    .copied()
                    .unwrap_or(60),
            ),
        })),
        CMD_CHECK => Ok(Action::Check(subject_args(sub, engine)?)),
        CMD_MARK => Ok(Action::Mark(subject_args(sub, engine)?)),
        CMD_CLEAR => Ok(Action::Clear(subject_args(sub, engine)?)),
        CMD_RECORDS => Ok(Action::Records(records::Args {
            engine,
            filter: sub.get_one::<RecordType>(ARG_RECORD_TYPE).copied(),
            limit: sub.get_one::<usize>(ARG_LIMIT).copied().unwrap_or(100),
        })),
        CMD_PURGE => Ok(Action::Purge(purge::Args { engine })),
        other => Err(anyhow!("unknown subcommand: {other}")),
    }
}
