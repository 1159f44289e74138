//! Code related to CLI things
//!

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, arg_required_else_help(false))]
/// Load the WHOIS database dumps of the five RIRs into PostgreSQL.
pub struct Cli {
    /// Connection string to the postgres database
    #[clap(short = 'c', long = "connection_string")]
    pub connection_string: Option<String>,
    /// Set the log level to DEBUG
    #[clap(short, long)]
    pub debug: bool,
    /// Drop and recreate the database schema before ingesting
    #[clap(long = "reset_db")]
    pub reset_db: bool,
    /// Commit every nth successful insert
    #[clap(long = "commit_count")]
    pub commit_count: Option<u64>,
    /// Directory holding the downloaded dump files
    #[clap(long = "downloads_dir")]
    pub downloads_dir: Option<String>,
    /// Number of ingestion workers (defaults to the CPU count)
    #[clap(long = "num_workers")]
    pub num_workers: Option<usize>,
    /// Configuration file
    #[clap(long)]
    pub config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_short_and_long_flags() {
        let cli = Cli::parse_from([
            "whoisdb",
            "-c",
            "postgresql://whoisd:whoisd@db:5432/whoisd",
            "--reset_db",
            "--commit_count",
            "500",
        ]);
        assert_eq!(
            cli.connection_string.as_deref(),
            Some("postgresql://whoisd:whoisd@db:5432/whoisd")
        );
        assert!(cli.reset_db);
        assert!(!cli.debug);
        assert_eq!(cli.commit_count, Some(500));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["whoisdb"]);
        assert!(cli.connection_string.is_none());
        assert!(cli.commit_count.is_none());
        assert!(!cli.reset_db);
    }
}
