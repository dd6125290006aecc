//! Handles command-line arguments and loading/validation of the optional
//! JSON configuration file.

use std::fs;
use std::path::Path;

use thiserror::Error;

pub use self::types::{Config, DataConfig, PathsConfig, ServerConfig};
pub mod types;

pub const VERSION_STRING: &str = concat!("SailNavSim version ", env!("CARGO_PKG_VERSION"));

pub const USAGE: &str = "usage: sailnavsim [-v|--version] [--perf] [--netport <port>]";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid arguments: {0}")]
pub struct ArgsError(String);

/// Parsed command-line arguments.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    /// Print version information and exit.
    pub show_version: bool,
    /// Run the deterministic performance workload instead of the simulator.
    pub perf: bool,
    /// Enable the TCP request server on this port.
    pub net_port: Option<u16>,
}

impl Args {
    /// Parses everything after the program name. Any unrecognized token is
    /// an error; the caller prints usage and exits non-zero.
    pub fn parse<I, S>(args: I) -> Result<Args, ArgsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Args::default();
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            match arg.as_ref() {
                "-v" | "--version" => parsed.show_version = true,
                "--perf" => parsed.perf = true,
                "--netport" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| ArgsError("--netport requires a port".into()))?;
                    let port = value
                        .as_ref()
                        .parse::<u16>()
                        .map_err(|_| ArgsError(format!("bad port: {}", value.as_ref())))?;
                    parsed.net_port = Some(port);
                }
                other => return Err(ArgsError(format!("unknown argument: {other}"))),
            }
        }

        Ok(parsed)
    }
}

/// Loads and validates configuration. A missing file yields the defaults;
/// a present but malformed file is an error.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Self::validate(&config)?;

        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.server.worker_threads == 0 {
            return Err(ConfigError::Validation(
                "server worker thread count must be greater than 0".to_string(),
            ));
        }

        if config.paths.commands.is_empty() {
            return Err(ConfigError::Validation("command input path must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn no_args_is_the_default() {
        let args = Args::parse(Vec::<String>::new()).unwrap();
        assert_eq!(args, Args::default());
    }

    #[test]
    fn version_flags() {
        assert!(Args::parse(["-v"]).unwrap().show_version);
        assert!(Args::parse(["--version"]).unwrap().show_version);
    }

    #[test]
    fn netport_takes_a_port() {
        let args = Args::parse(["--netport", "31337"]).unwrap();
        assert_eq!(args.net_port, Some(31337));

        assert!(Args::parse(["--netport"]).is_err());
        assert!(Args::parse(["--netport", "99999"]).is_err());
        assert!(Args::parse(["--netport", "abc"]).is_err());
    }

    #[test]
    fn perf_and_netport_combine() {
        let args = Args::parse(["--perf", "--netport", "9000"]).unwrap();
        assert!(args.perf);
        assert_eq!(args.net_port, Some(9000));
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert!(Args::parse(["--frobnicate"]).is_err());
        assert!(Args::parse(["extra"]).is_err());
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::load_or_default(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.paths.commands, "./cmds");
        assert_eq!(config.server.worker_threads, 5);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"host": "0.0.0.0", "worker_threads": 8}}}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_or_default(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.worker_threads, 8);
        // Untouched sections keep their defaults.
        assert_eq!(config.paths.sqlite_db, "./sailnavsim.sql");
    }

    #[test]
    fn zero_workers_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"worker_threads": 0}}}}"#).unwrap();
        file.flush().unwrap();

        let result = ConfigLoader::load_or_default(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            ConfigLoader::load_or_default(file.path()),
            Err(ConfigError::JsonParse(_))
        ));
    }
}
