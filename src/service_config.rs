//! Process-level configuration loaded from the environment (`.env` honored via `dotenv`),
//! grounded in the teacher's `src/service_config.rs`.

use std::env;

use workpool_database::RedisPool;

use crate::error::Error;

#[derive(Clone, Debug)]
pub struct Config {
    pub namespace: String,
    pub redis_url: String,
    pub concurrency: usize,
    /// Explicit pool id, so `retryOnStart` crash recovery can apply across restarts (§9 Open
    /// Question). Unset means a fresh random id every run.
    pub pool_id: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();

        let namespace: String = envoption::with_default("WORKPOOL_NAMESPACE", "workpool".to_string())
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        let concurrency: usize = envoption::with_default("WORKPOOL_CONCURRENCY", 4usize)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        let pool_id: Option<String> =
            envoption::optional("WORKPOOL_POOL_ID").map_err(|e| Error::ConfigError(e.to_string()))?;
        let redis_url =
            env::var("REDIS_URL").map_err(|_| Error::ConfigError("REDIS_URL is required".into()))?;

        Ok(Config {
            namespace,
            redis_url,
            concurrency,
            pool_id,
        })
    }

    pub fn redis_pool(&self) -> Result<RedisPool, Error> {
        RedisPool::new(Some(self.redis_url.clone())).map_err(Error::from)
    }
}
