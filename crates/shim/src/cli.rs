//! Command-line interface of the shim harness.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Options given here override the matching configuration file settings.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Stop after this many pumps instead of waiting for a signal
    pub cycles: Option<u64>,
    /// Also start a game server session
    pub server: bool,
    /// Pull events through manual dispatch
    pub manual: bool,
    /// Extra version tokens to resolve
    pub resolve: Vec<String>,
    /// Built export library to drive through its C interface
    pub probe: Option<PathBuf>,
}

fn command() -> Command {
    Command::new("Shim Harness")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs an emulated client session in-process or probes a built export library")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("shim.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("cycles")
                .short('n')
                .long("cycles")
                .value_name("N")
                .help("Number of pumps before shutting down")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .help("Start a game server session next to the client")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("manual")
                .short('m')
                .long("manual")
                .help("Use manual dispatch instead of callbacks")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("resolve")
                .short('r')
                .long("resolve")
                .value_name("TOKEN")
                .help("Interface version token to resolve (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("probe")
                .short('p')
                .long("probe")
                .value_name("LIBRARY")
                .help("Load a built export library and exercise its C interface"),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("shim.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            cycles: matches.get_one::<u64>("cycles").copied(),
            server: matches.get_flag("server"),
            manual: matches.get_flag("manual"),
            resolve: matches
                .get_many::<String>("resolve")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            probe: matches.get_one::<String>("probe").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["shim"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("shim.toml"));
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
        assert!(args.cycles.is_none());
        assert!(!args.server);
        assert!(!args.manual);
        assert!(args.resolve.is_empty());
        assert!(args.probe.is_none());
    }

    #[test]
    fn test_all_options() {
        let args = CliArgs::try_parse_from([
            "shim",
            "--config",
            "custom.toml",
            "--log-level",
            "debug",
            "--json-logs",
            "--cycles",
            "12",
            "--server",
            "--manual",
            "--resolve",
            "SteamUser021",
            "-r",
            "SteamUtils010",
            "--probe",
            "target/debug/libshim_exports.so",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.cycles, Some(12));
        assert!(args.server);
        assert!(args.manual);
        assert_eq!(args.resolve, vec!["SteamUser021", "SteamUtils010"]);
        assert_eq!(
            args.probe,
            Some(PathBuf::from("target/debug/libshim_exports.so"))
        );
    }

    #[test]
    fn test_cycles_must_be_numeric() {
        assert!(CliArgs::try_parse_from(["shim", "--cycles", "many"]).is_err());
    }
}
