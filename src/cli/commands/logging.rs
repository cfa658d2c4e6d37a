use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names accepted in `INTRUDER_LOG_LEVEL`, as the equivalent `-v` count.
const LEVEL_NAMES: [(&str, u8); 6] = [
    ("error", 0),
    ("warn", 1),
    ("warning", 1),
    ("info", 2),
    ("debug", 3),
    ("trace", 4),
];

const MAX_VERBOSITY: u8 = 4;

fn parse_level(level: &str) -> Result<u8, String> {
    let level = level.trim();
    if let Ok(count) = level.parse::<u8>() {
        return if count <= MAX_VERBOSITY {
            Ok(count)
        } else {
            Err(format!("log level must be between 0 and {MAX_VERBOSITY}"))
        };
    }
    LEVEL_NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(level))
        .map(|(_, count)| *count)
        .ok_or_else(|| format!("invalid log level: {level}"))
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(parse_level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity: repeat -v, or set INTRUDER_LOG_LEVEL to error, warn, info, debug or trace (default: error)")
            .env("INTRUDER_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_map_to_verbosity_counts() {
        assert_eq!(parse_level("error"), Ok(0));
        assert_eq!(parse_level("WARNING"), Ok(1));
        assert_eq!(parse_level(" Info "), Ok(2));
        assert_eq!(parse_level("trace"), Ok(4));
        assert_eq!(parse_level("3"), Ok(3));
    }

    #[test]
    fn out_of_range_or_unknown_levels_are_rejected() {
        assert!(parse_level("5").is_err());
        assert!(parse_level("loud").is_err());
        assert!(parse_level("").is_err());
    }
}
