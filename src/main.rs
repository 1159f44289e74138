use clap::Parser;
use log::{error, info};
use std::process::ExitCode;
use whoisdb::cli::Cli;
use whoisdb::config::{RunConfig, setup_logging};
use whoisdb::error::WhoisDbError;
use whoisdb::{db, loader};

async fn run(config: RunConfig) -> Result<(), WhoisDbError> {
    let pool = db::setup_connection(&config).await?;
    if config.reset_db {
        info!("Resetting database schema");
        db::drop_db(&pool).await?;
    }
    db::start_db(&pool).await?;
    loader::run(&config, &pool).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match RunConfig::try_from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let _logger = match setup_logging(&config) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    info!("Starting ingest: {config}");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
