/// When things go awry
#[derive(Debug, thiserror::Error)]
pub enum WhoisDbError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Regex(#[from] regex::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    /// Something failed in the start up of the platform
    #[error("startup failed: {0}")]
    Startup(String),
    /// Failed to send something across a channel
    #[error("channel send failed: {0}")]
    Send(String),
}
