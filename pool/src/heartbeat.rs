//! The heartbeater (§4.8): the single source of truth the dead-pool reaper uses to decide
//! whether a pool is still alive. One of these runs per pool, not per worker.

use std::time::Duration;

use tracing::warn;
use workpool_database::RedisPool;
use workpool_shutdown::ShutdownSignal;

use crate::keys::Keys;

const INTERVAL: Duration = Duration::from_secs(5);

pub struct HeartbeatInfo {
    pub pool_id: String,
    pub job_names: Vec<String>,
    pub concurrency: usize,
    pub worker_ids: Vec<String>,
    /// Epoch seconds captured once, when the pool started; written unchanged on every beat so
    /// it stays distinguishable from `heartbeat_at` (§4.8).
    pub started_at: i64,
}

impl HeartbeatInfo {
    pub fn new(pool_id: String, job_names: Vec<String>, concurrency: usize, worker_ids: Vec<String>) -> Self {
        HeartbeatInfo {
            pool_id,
            job_names,
            concurrency,
            worker_ids,
            started_at: chrono::Utc::now().timestamp(),
        }
    }

    async fn write_beat(&self, conn: &mut deadpool_redis::Connection, keys: &Keys) {
        let mut job_names = self.job_names.clone();
        job_names.sort();
        let mut worker_ids = self.worker_ids.clone();
        worker_ids.sort();

        let heartbeat_key = keys.heartbeat(&self.pool_id);
        let host = hostname();
        let pid = std::process::id();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&heartbeat_key, "heartbeat_at", chrono::Utc::now().timestamp())
            .hset(&heartbeat_key, "started_at", self.started_at)
            .hset(&heartbeat_key, "job_names", job_names.join(","))
            .hset(&heartbeat_key, "concurrency", self.concurrency as i64)
            .hset(&heartbeat_key, "worker_ids", worker_ids.join(","))
            .hset(&heartbeat_key, "host", host)
            .hset(&heartbeat_key, "pid", pid as i64)
            .sadd(keys.worker_pools(), &self.pool_id);

        if let Err(e) = pipe.query_async::<_, ()>(&mut **conn).await {
            warn!(pool_id = %self.pool_id, error = %e, "heartbeat write failed");
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Runs until `shutdown` fires, then removes this pool from the registry before returning.
pub async fn run(redis: RedisPool, keys: Keys, info: HeartbeatInfo, mut shutdown: ShutdownSignal) {
    if let Ok(mut conn) = redis.pool().get().await {
        info.write_beat(&mut conn, &keys).await;
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(INTERVAL) => {}
            _ = shutdown.until_triggered() => break,
        }

        match redis.pool().get().await {
            Ok(mut conn) => info.write_beat(&mut conn, &keys).await,
            Err(e) => warn!(pool_id = %info.pool_id, error = %e, "heartbeat could not get connection"),
        }
    }

    if let Ok(mut conn) = redis.pool().get().await {
        let heartbeat_key = keys.heartbeat(&info.pool_id);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&heartbeat_key)
            .srem(keys.worker_pools(), &info.pool_id);
        let _ = pipe.query_async::<_, ()>(&mut *conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_matches_spec() {
        assert_eq!(INTERVAL, Duration::from_secs(5));
    }
}
