use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

use crate::intruder::config::CleanupSettings;

pub const ARG_MAX_RECORD_AGE_SECONDS: &str = "max-record-age-seconds";
pub const ARG_CLEANUP_INTERVAL_SECONDS: &str = "cleanup-interval-seconds";
pub const ARG_CLEANUP_MAX_PER_CYCLE: &str = "cleanup-max-per-cycle";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub cleanup: CleanupSettings,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let defaults = CleanupSettings::new();
        let max_record_age = matches
            .get_one::<u64>(ARG_MAX_RECORD_AGE_SECONDS)
            .copied()
            .map_or(defaults.max_record_age(), Duration::from_secs);
        let interval = matches
            .get_one::<u64>(ARG_CLEANUP_INTERVAL_SECONDS)
            .copied()
            .map_or(defaults.interval(), Duration::from_secs);
        let max_per_cycle = matches
            .get_one::<usize>(ARG_CLEANUP_MAX_PER_CYCLE)
            .copied()
            .unwrap_or(defaults.max_per_cycle());

        Self {
            cleanup: CleanupSettings::new()
                .with_max_record_age(max_record_age)
                .with_interval(interval)
                .with_max_per_cycle(max_per_cycle)
                .normalize(),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_RECORD_AGE_SECONDS)
                .long(ARG_MAX_RECORD_AGE_SECONDS)
                .help("Purge records idle longer than this, in seconds (never below the longest reset window)")
                .env("INTRUDER_MAX_RECORD_AGE_SECONDS")
                .default_value("604800")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CLEANUP_INTERVAL_SECONDS)
                .long(ARG_CLEANUP_INTERVAL_SECONDS)
                .help("Reaper interval in seconds")
                .env("INTRUDER_CLEANUP_INTERVAL_SECONDS")
                .default_value("300")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CLEANUP_MAX_PER_CYCLE)
                .long(ARG_CLEANUP_MAX_PER_CYCLE)
                .help("Maximum records purged per reaper cycle")
                .env("INTRUDER_CLEANUP_MAX_PER_CYCLE")
                .default_value("1000")
                .global(true)
                .value_parser(clap::value_parser!(usize)),
        )
}
