use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use super::EngineArgs;
use crate::intruder::record::RecordType;
use crate::storage::{redact_dsn, StorageSettings};
use secrecy::ExposeSecret;

#[derive(Debug)]
pub struct Args {
    pub engine: EngineArgs,
    pub stats_interval: Duration,
}

/// Run the engine with its reaper until ctrl-c.
/// # Errors
/// Returns an error if the signal handler cannot be installed.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let manager = args.engine.open().await;
    manager.start().await;

    let mut stats = (!args.stats_interval.is_zero()).then(|| {
        let mut ticker = tokio::time::interval(args.stats_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("shutdown requested");
                break;
            }
            () = async {
                match stats.as_mut() {
                    Some(ticker) => { ticker.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                let snapshot = manager.statistics();
                info!(
                    attempts = snapshot.attempts,
                    lockouts = snapshot.lockouts,
                    alerts = snapshot.alerts,
                    alert_failures = snapshot.alert_failures,
                    clears = snapshot.clears,
                    purged = snapshot.purged,
                    "intruder statistics"
                );
            }
        }
    }

    manager.close().await;
    Ok(())
}

fn log_startup_args(args: &Args) {
    let storage = match &args.engine.storage {
        StorageSettings::Memory => "memory".to_string(),
        StorageSettings::Sqlite { path } => format!("sqlite:{}", path.display()),
        StorageSettings::Postgres { dsn, .. } => redact_dsn(dsn.expose_secret()),
    };
    let config = &args.engine.config;
    let mut entries = vec![("storage", storage)];
    for record_type in RecordType::ALL {
        let settings = config.record_type(record_type);
        let value = if settings.is_enabled() {
            format!(
                "{} attempts / {}s, reset {}s",
                settings.check_count(),
                settings.check_duration().as_secs(),
                settings.reset_duration().as_secs()
            )
        } else {
            "disabled".to_string()
        };
        entries.push((record_type.as_str(), value));
    }
    entries.push((
        "session_max_attempts",
        config.session_max_attempts().to_string(),
    ));
    entries.push((
        "max_delay_ms",
        config.delay().max_delay().as_millis().to_string(),
    ));
    entries.push((
        "max_record_age_secs",
        config.cleanup().max_record_age().as_secs().to_string(),
    ));
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "intruder {} - {}\n\n{title}:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}
