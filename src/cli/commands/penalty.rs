use clap::{Arg, ArgMatches, Command};

use crate::intruder::config::DelaySettings;

pub const ARG_DELAY_MIN_MS: &str = "delay-min-ms";
pub const ARG_DELAY_PER_ATTEMPT_MS: &str = "delay-per-attempt-ms";
pub const ARG_DELAY_MAX_JITTER_MS: &str = "delay-max-jitter-ms";
pub const ARG_DELAY_MAX_MS: &str = "delay-max-ms";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub delay: DelaySettings,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let defaults = DelaySettings::new();
        let read = |id: &str, default: std::time::Duration| -> u64 {
            matches
                .get_one::<u64>(id)
                .copied()
                .unwrap_or_else(|| u64::try_from(default.as_millis()).unwrap_or(u64::MAX))
        };

        Self {
            delay: DelaySettings::none()
                .with_min_delay_ms(read(ARG_DELAY_MIN_MS, defaults.min_delay()))
                .with_per_attempt_ms(read(ARG_DELAY_PER_ATTEMPT_MS, defaults.per_attempt()))
                .with_max_jitter_ms(read(ARG_DELAY_MAX_JITTER_MS, defaults.max_jitter()))
                .with_max_delay_ms(read(ARG_DELAY_MAX_MS, defaults.max_delay())),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DELAY_MIN_MS)
                .long(ARG_DELAY_MIN_MS)
                .help("Base response delay after a failed attempt, in milliseconds")
                .env("INTRUDER_DELAY_MIN_MS")
                .default_value("100")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DELAY_PER_ATTEMPT_MS)
                .long(ARG_DELAY_PER_ATTEMPT_MS)
                .help("Extra delay per recorded attempt, in milliseconds")
                .env("INTRUDER_DELAY_PER_ATTEMPT_MS")
                .default_value("50")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DELAY_MAX_JITTER_MS)
                .long(ARG_DELAY_MAX_JITTER_MS)
                .help("Upper bound of the random jitter, in milliseconds")
                .env("INTRUDER_DELAY_MAX_JITTER_MS")
                .default_value("100")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DELAY_MAX_MS)
                .long(ARG_DELAY_MAX_MS)
                .help("Delay cap, in milliseconds (0 disables the penalty)")
                .env("INTRUDER_DELAY_MAX_MS")
                .default_value("3000")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
}
