use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    PoolError(#[from] workpool_pool::Error),

    #[error(transparent)]
    DatabaseError(#[from] workpool_database::Error),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
