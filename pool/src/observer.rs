//! Best-effort "what is this worker doing right now" record (§4.11). Every write here is
//! advisory: a failure is logged by the caller and never changes job outcome, so the functions
//! return `Result` purely so the worker loop can decide whether to log, not to gate on it.

use chrono::Utc;

use crate::{error::Result, job::JobRecord, keys::Keys};

/// Call before invoking a handler.
pub async fn observe_start(
    conn: &mut deadpool_redis::Connection,
    keys: &Keys,
    pool_id: &str,
    worker_id: &str,
    job: &JobRecord,
) -> Result<()> {
    let key = keys.observation(pool_id, worker_id);
    let mut pipe = redis::pipe();
    pipe.atomic()
        .hset(&key, "job_name", &job.name)
        .hset(&key, "job_id", &job.id)
        .hset(&key, "started_at", Utc::now().timestamp());
    let _: () = pipe.query_async(&mut **conn).await?;
    Ok(())
}

/// Call after a handler returns, times out, or is abandoned via a clear signal.
pub async fn observe_done(
    conn: &mut deadpool_redis::Connection,
    keys: &Keys,
    pool_id: &str,
    worker_id: &str,
) -> Result<()> {
    let key = keys.observation(pool_id, worker_id);
    let _: () = redis::cmd("DEL").arg(&key).query_async(&mut **conn).await?;
    Ok(())
}
