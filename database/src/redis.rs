use std::{env, ops::Deref, sync::Arc};

use crate::error::{Error, Result};

/// A cloneable handle to the shared Redis connection pool every task in a worker pool draws
/// connections from. All cross-process state for the job engine lives behind this pool; there
/// is no other shared mutable state between pools or workers. Namespacing keys under a prefix
/// is `workpool_pool::keys::Keys`' job, not this type's — it owns the transport only.
#[derive(Clone)]
pub struct RedisPool(Arc<deadpool_redis::Pool>);

impl Deref for RedisPool {
    type Target = deadpool_redis::Pool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl RedisPool {
    /// Build a pool from an explicit connection string, or `REDIS_URL` if `connection` is
    /// `None`.
    pub fn new(connection: Option<String>) -> Result<RedisPool> {
        let redis_url = match connection {
            Some(url) => url,
            None => env::var("REDIS_URL")
                .map_err(|_| Error::ConfigError("REDIS_URL is required".into()))?,
        };

        let pool = deadpool_redis::Config {
            url: Some(redis_url),
            connection: None,
            pool: None,
        }
        .create_pool()?;

        Ok(RedisPool(Arc::new(pool)))
    }

    pub fn pool(&self) -> &deadpool_redis::Pool {
        &self.0
    }
}
