use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

use crate::intruder::config::{IntruderConfig, RecordTypeSettings};
use crate::intruder::record::RecordType;

pub const ARG_SESSION_MAX_ATTEMPTS: &str = "session-max-attempts";

/// Argument ids and environment variables for one record type.
struct PolicyArgs {
    record_type: RecordType,
    count: &'static str,
    count_env: &'static str,
    check: &'static str,
    check_env: &'static str,
    reset: &'static str,
    reset_env: &'static str,
}

const POLICY_ARGS: [PolicyArgs; 5] = [
    PolicyArgs {
        record_type: RecordType::Address,
        count: "address-check-count",
        count_env: "INTRUDER_ADDRESS_CHECK_COUNT",
        check: "address-check-seconds",
        check_env: "INTRUDER_ADDRESS_CHECK_SECONDS",
        reset: "address-reset-seconds",
        reset_env: "INTRUDER_ADDRESS_RESET_SECONDS",
    },
    PolicyArgs {
        record_type: RecordType::Username,
        count: "username-check-count",
        count_env: "INTRUDER_USERNAME_CHECK_COUNT",
        check: "username-check-seconds",
        check_env: "INTRUDER_USERNAME_CHECK_SECONDS",
        reset: "username-reset-seconds",
        reset_env: "INTRUDER_USERNAME_RESET_SECONDS",
    },
    PolicyArgs {
        record_type: RecordType::UserDn,
        count: "user-dn-check-count",
        count_env: "INTRUDER_USER_DN_CHECK_COUNT",
        check: "user-dn-check-seconds",
        check_env: "INTRUDER_USER_DN_CHECK_SECONDS",
        reset: "user-dn-reset-seconds",
        reset_env: "INTRUDER_USER_DN_RESET_SECONDS",
    },
    PolicyArgs {
        record_type: RecordType::Attribute,
        count: "attribute-check-count",
        count_env: "INTRUDER_ATTRIBUTE_CHECK_COUNT",
        check: "attribute-check-seconds",
        check_env: "INTRUDER_ATTRIBUTE_CHECK_SECONDS",
        reset: "attribute-reset-seconds",
        reset_env: "INTRUDER_ATTRIBUTE_RESET_SECONDS",
    },
    PolicyArgs {
        record_type: RecordType::TokenDest,
        count: "token-dest-check-count",
        count_env: "INTRUDER_TOKEN_DEST_CHECK_COUNT",
        check: "token-dest-check-seconds",
        check_env: "INTRUDER_TOKEN_DEST_CHECK_SECONDS",
        reset: "token-dest-reset-seconds",
        reset_env: "INTRUDER_TOKEN_DEST_RESET_SECONDS",
    },
];

#[derive(Debug, Clone)]
pub struct Options {
    pub record_types: Vec<(RecordType, RecordTypeSettings)>,
    pub session_max_attempts: u32,
}

impl Options {
    /// Parse per-type thresholds; unset values fall back to the type defaults.
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let record_types = POLICY_ARGS
            .iter()
            .map(|args| {
                let defaults = RecordTypeSettings::default_for(args.record_type);
                let count = matches
                    .get_one::<u32>(args.count)
                    .copied()
                    .unwrap_or(defaults.check_count());
                let check = matches
                    .get_one::<u64>(args.check)
                    .copied()
                    .map_or(defaults.check_duration(), Duration::from_secs);
                let reset = matches
                    .get_one::<u64>(args.reset)
                    .copied()
                    .map_or(defaults.reset_duration(), Duration::from_secs);
                (args.record_type, RecordTypeSettings::new(count, check, reset))
            })
            .collect();

        Self {
            record_types,
            session_max_attempts: matches
                .get_one::<u32>(ARG_SESSION_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(10),
        }
    }

    #[must_use]
    pub fn apply(self, config: IntruderConfig) -> IntruderConfig {
        self.record_types
            .into_iter()
            .fold(config, |config, (record_type, settings)| {
                config.with_record_type(record_type, settings)
            })
            .with_session_max_attempts(self.session_max_attempts)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = POLICY_ARGS.iter().fold(command, |command, args| {
        let label = args.record_type.as_str();
        command
            .arg(
                Arg::new(args.count)
                    .long(args.count)
                    .help(format!("Failed attempts before a {label} subject locks (0 disables)"))
                    .env(args.count_env)
                    .global(true)
                    .value_parser(clap::value_parser!(u32)),
            )
            .arg(
                Arg::new(args.check)
                    .long(args.check)
                    .help(format!("Lock window for {label} subjects in seconds"))
                    .env(args.check_env)
                    .global(true)
                    .value_parser(clap::value_parser!(u64)),
            )
            .arg(
                Arg::new(args.reset)
                    .long(args.reset)
                    .help(format!("Idle time before a {label} record resets, in seconds"))
                    .env(args.reset_env)
                    .global(true)
                    .value_parser(clap::value_parser!(u64)),
            )
    });

    command.arg(
        Arg::new(ARG_SESSION_MAX_ATTEMPTS)
            .long(ARG_SESSION_MAX_ATTEMPTS)
            .help("Failed attempts before a session locks (0 disables)")
            .env("INTRUDER_SESSION_MAX_ATTEMPTS")
            .default_value("10")
            .global(true)
            .value_parser(clap::value_parser!(u32)),
    )
}
