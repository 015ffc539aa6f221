use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis connection error {0}")]
    RedisPoolError(#[from] deadpool::managed::PoolError<::redis::RedisError>),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    DatabaseError(#[from] workpool_database::Error),

    #[error("Invalid cron schedule: {0}")]
    CronError(#[from] cron::error::Error),

    #[error("No handler registered for job type {0:?}")]
    UnknownJobType(String),

    #[error("Job priority {0} is out of the allowed range 1..=100000")]
    InvalidPriority(u32),

    #[error("Job Error: {0}")]
    JobError(anyhow::Error),

    #[error("Job drain error: {0}")]
    DrainError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
