use crate::DEFAULT_COMMIT_COUNT;
use crate::cli::Cli;
use crate::error::WhoisDbError;
use config::{Config, File};
use flexi_logger::LoggerHandle;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;

lazy_static! {
    static ref CONFIG_LOCATIONS: Vec<&'static str> =
        ["./whoisdb.json", "~/.config/whoisdb.json"].to_vec();
}

/// The run context: everything the loader and its workers need to know,
/// resolved once at startup from config file, environment and CLI.
#[derive(Debug, Deserialize, Eq, PartialEq, Clone, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// PostgreSQL DSN, e.g. `postgresql://whoisd:whoisd@db:5432/whoisd`
    pub connection_string: String,
    /// Force DEBUG logging
    pub debug: bool,
    /// Drop and recreate the schema before ingesting
    pub reset_db: bool,
    /// Commit every nth successful insert
    pub commit_count: u64,
    /// Where the dump files live; processed files move to `done/` below it
    pub downloads_dir: PathBuf,
    /// Ingestion worker count
    pub num_workers: usize,
    /// Default is "info"
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            debug: false,
            reset_db: false,
            commit_count: DEFAULT_COMMIT_COUNT,
            downloads_dir: PathBuf::from("./downloads"),
            num_workers: num_cpus::get(),
            log_level: "info".to_string(),
        }
    }
}

impl Display for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "downloads_dir={:?} num_workers={} commit_count={} reset_db={} log_level={}",
            self.downloads_dir, self.num_workers, self.commit_count, self.reset_db, self.log_level
        ))
    }
}

impl RunConfig {
    /// JSONify the config in a pretty way using serde
    pub fn as_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("Failed to serialize config: {e:?}"))
    }

    /// Loads the configuration from a given file or from some default
    /// locations, layering a `WHOISDB_`-prefixed environment source on
    /// top. Missing files are fine; the defaults carry the run.
    pub fn try_from_file(config_path: Option<&String>) -> Result<RunConfig, WhoisDbError> {
        let file_locations = match config_path {
            Some(value) => vec![value.to_owned()],
            None => CONFIG_LOCATIONS.iter().map(|x| x.to_string()).collect(),
        };

        let found_files: Vec<String> = file_locations
            .iter()
            .filter_map(|f| {
                let path = shellexpand::tilde(&f).into_owned();
                match std::path::Path::new(&path).exists() {
                    false => None,
                    true => Some(path),
                }
            })
            .collect();

        let mut builder = Config::builder();
        if let Some(filename) = found_files.first() {
            builder = builder.add_source(File::new(filename, config::FileFormat::Json));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("whoisdb"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Resolve the final run context: file/env configuration with the
    /// CLI flags layered over the top.
    pub fn try_from_cli(cli: &Cli) -> Result<RunConfig, WhoisDbError> {
        let mut config = Self::try_from_file(cli.config.as_ref())?;
        if let Some(connection_string) = &cli.connection_string {
            config.connection_string = connection_string.clone();
        }
        if cli.debug {
            config.debug = true;
        }
        if cli.reset_db {
            config.reset_db = true;
        }
        if let Some(commit_count) = cli.commit_count {
            config.commit_count = commit_count;
        }
        if let Some(downloads_dir) = &cli.downloads_dir {
            config.downloads_dir = PathBuf::from(downloads_dir);
        }
        if let Some(num_workers) = cli.num_workers {
            config.num_workers = num_workers;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WhoisDbError> {
        if self.connection_string.is_empty() {
            return Err(WhoisDbError::Startup(
                "no connection string configured, pass --connection_string".to_string(),
            ));
        }
        if self.commit_count == 0 {
            return Err(WhoisDbError::Startup(
                "commit_count must be at least 1".to_string(),
            ));
        }
        if self.num_workers == 0 {
            return Err(WhoisDbError::Startup(
                "num_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Start the logger, honouring `--debug` over the configured level.
pub fn setup_logging(config: &RunConfig) -> Result<LoggerHandle, WhoisDbError> {
    let log_level = match config.debug {
        true => "debug".to_string(),
        false => config.log_level.to_ascii_lowercase(),
    };

    let logger = flexi_logger::Logger::try_with_str(log_level)
        .map_err(|e| WhoisDbError::Startup(format!("Failed to start logger! {e:?}")))?;

    logger
        .write_mode(flexi_logger::WriteMode::Async)
        .start()
        .map_err(|e| WhoisDbError::Startup(format!("Failed to start logger! {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.commit_count, DEFAULT_COMMIT_COUNT);
        assert_eq!(config.downloads_dir, PathBuf::from("./downloads"));
        assert!(config.num_workers >= 1);
        assert!(!config.reset_db);
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "whoisdb",
            "-c",
            "postgresql://localhost/whoisd",
            "-d",
            "--commit_count",
            "42",
            "--num_workers",
            "3",
        ]);
        let config = RunConfig::try_from_cli(&cli).expect("config should resolve");
        assert_eq!(config.connection_string, "postgresql://localhost/whoisd");
        assert!(config.debug);
        assert_eq!(config.commit_count, 42);
        assert_eq!(config.num_workers, 3);
    }

    #[test]
    fn test_missing_connection_string_is_a_startup_error() {
        let cli = Cli::parse_from(["whoisdb"]);
        assert!(matches!(
            RunConfig::try_from_cli(&cli),
            Err(WhoisDbError::Startup(_))
        ));
    }

    #[test]
    fn test_zero_commit_count_is_rejected() {
        let cli = Cli::parse_from(["whoisdb", "-c", "postgresql://x", "--commit_count", "0"]);
        assert!(matches!(
            RunConfig::try_from_cli(&cli),
            Err(WhoisDbError::Startup(_))
        ));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = RunConfig {
            connection_string: "postgresql://localhost/whoisd".to_string(),
            ..RunConfig::default()
        };
        let parsed: RunConfig =
            serde_json::from_str(&config.as_json_pretty()).expect("config json should parse");
        assert_eq!(parsed, config);
    }
}
