pub mod cleanup;
pub mod logging;
pub mod penalty;
pub mod policy;
pub mod storage;

use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};

use crate::intruder::record::RecordType;

pub const CMD_SERVE: &str = "serve";
pub const CMD_CHECK: &str = "check";
pub const CMD_MARK: &str = "mark";
pub const CMD_CLEAR: &str = "clear";
pub const CMD_RECORDS: &str = "records";
pub const CMD_PURGE: &str = "purge";

pub const ARG_RECORD_TYPE: &str = "type";
pub const ARG_SUBJECT: &str = "subject";
pub const ARG_LIMIT: &str = "limit";
pub const ARG_STATS_INTERVAL_SECONDS: &str = "stats-interval-seconds";

#[must_use]
pub fn validator_record_type() -> ValueParser {
    ValueParser::from(|value: &str| value.parse::<RecordType>())
}

fn subject_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new(ARG_RECORD_TYPE)
                .help("Record type: address, username, user_dn, attribute, token_dest")
                .required(true)
                .value_parser(validator_record_type()),
        )
        .arg(
            Arg::new(ARG_SUBJECT)
                .help("Subject, for example a username or an IP address")
                .required(true),
        )
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("intruder")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(CMD_SERVE)
                .about("Run the engine and its reaper until interrupted")
                .arg(
                    Arg::new(ARG_STATS_INTERVAL_SECONDS)
                        .long(ARG_STATS_INTERVAL_SECONDS)
                        .help("Log statistics every N seconds (0 disables)")
                        .env("INTRUDER_STATS_INTERVAL_SECONDS")
                        .default_value("60")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(subject_command(CMD_CHECK, "Report whether a subject is locked out"))
        .subcommand(subject_command(
            CMD_MARK,
            "Record a failed attempt for a subject",
        ))
        .subcommand(subject_command(CMD_CLEAR, "Forget a subject"))
        .subcommand(
            Command::new(CMD_RECORDS)
                .about("List live intruder records as JSON lines")
                .arg(
                    Arg::new(ARG_RECORD_TYPE)
                        .long(ARG_RECORD_TYPE)
                        .short('t')
                        .help("Only list records of this type")
                        .value_parser(validator_record_type()),
                )
                .arg(
                    Arg::new(ARG_LIMIT)
                        .long(ARG_LIMIT)
                        .short('l')
                        .help("Maximum records to list")
                        .default_value("100")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(Command::new(CMD_PURGE).about("Run one cleanup cycle now"));

    let command = storage::with_args(command);
    let command = policy::with_args(command);
    let command = penalty::with_args(command);
    let command = cleanup::with_args(command);
    logging::with_args(command)
}
