//! Read-only introspection (supplemented feature, not present in the original design notes but
//! needed by anything operating the pool from the outside — `workpoolctl`'s `stats`/`show`
//! subcommands, and smoke tests). Grounded in the teacher's `queues::Queue` status accessors.

use redis::AsyncCommands;
use workpool_database::RedisPool;

use crate::{error::Result, job::JobRecord, keys::Keys};

#[derive(Debug, Clone)]
pub struct JobTypeStatus {
    pub name: String,
    pub pending: i64,
    pub paused: bool,
    pub lock: i64,
    pub max_concurrency: i64,
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub job_types: Vec<JobTypeStatus>,
    pub retry_count: i64,
    pub scheduled_count: i64,
    pub dead_count: i64,
    pub active_worker_pools: Vec<String>,
}

pub async fn job_type_status(redis: &RedisPool, keys: &Keys, name: &str) -> Result<JobTypeStatus> {
    let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;
    let pending: i64 = conn.llen(keys.jobs(name)).await?;
    let paused: bool = conn.exists(keys.paused(name)).await?;
    let lock: i64 = conn.get(keys.lock(name)).await.unwrap_or(0);
    let max_concurrency: i64 = conn.get(keys.max_concurrency(name)).await.unwrap_or(0);

    Ok(JobTypeStatus {
        name: name.to_string(),
        pending,
        paused,
        lock,
        max_concurrency,
    })
}

pub async fn pool_status(redis: &RedisPool, keys: &Keys, job_names: &[String]) -> Result<PoolStatus> {
    let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;

    let mut job_types = Vec::with_capacity(job_names.len());
    for name in job_names {
        job_types.push(job_type_status(redis, keys, name).await?);
    }

    let retry_count: i64 = conn.zcard(keys.retry()).await?;
    let scheduled_count: i64 = conn.zcard(keys.scheduled()).await?;
    let dead_count: i64 = conn.zcard(keys.dead()).await?;
    let active_worker_pools: Vec<String> = conn.smembers(keys.worker_pools()).await?;

    Ok(PoolStatus {
        job_types,
        retry_count,
        scheduled_count,
        dead_count,
        active_worker_pools,
    })
}

/// Sets (or clears) the pause flag for one job type.
pub async fn set_paused(redis: &RedisPool, keys: &Keys, name: &str, paused: bool) -> Result<()> {
    let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;
    let key = keys.paused(name);
    if paused {
        let _: () = conn.set(key, 1).await?;
    } else {
        let _: () = conn.del(key).await?;
    }
    Ok(())
}

/// Scans the `dead` sorted set for entries matching `job_id`, for `workpoolctl show`.
pub async fn find_dead_job(redis: &RedisPool, keys: &Keys, job_id: &str) -> Result<Option<JobRecord>> {
    let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;
    let entries: Vec<String> = conn.zrange(keys.dead(), 0, -1).await?;
    for entry in entries {
        if let Ok(job) = JobRecord::from_payload(&entry) {
            if job.id == job_id {
                return Ok(Some(job));
            }
        }
    }
    Ok(None)
}
