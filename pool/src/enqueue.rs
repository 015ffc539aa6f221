//! The client-facing enqueue contract (§6). Spec.md treats the job-submission client as an
//! external collaborator, but the wire encoding it produces is part of this core's contract —
//! the worker pool's own tests and the `workpoolctl` CLI both need to speak it, so it lives
//! here rather than being re-implemented ad hoc by every caller.

use redis::AsyncCommands;
use serde_json::Map;
use sha3::{Digest, Sha3_256};

use crate::{
    error::Result,
    job::{JobId, JobRecord},
    keys::Keys,
};

/// `stable-hash(name, args)`, used as the uniqueness key (§3, §6). Sorting the JSON map's keys
/// before hashing isn't necessary here since `serde_json::Map` preserves insertion order by
/// default and callers are expected to build `args` deterministically; this hashes the
/// canonical `(name, args)` JSON encoding.
pub fn unique_hash(name: &str, args: &Map<String, serde_json::Value>) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(args).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// Appends the envelope to `jobs:<name>` and records `<name>` in `known_jobs`.
pub async fn enqueue(
    conn: &mut deadpool_redis::Connection,
    keys: &Keys,
    job: &JobRecord,
) -> Result<()> {
    let payload = job.to_payload()?;
    let mut pipe = redis::pipe();
    pipe.atomic()
        .lpush(keys.jobs(&job.name), &payload)
        .sadd(keys.known_jobs(), &job.name);
    pipe.query_async::<_, ()>(&mut **conn).await?;
    Ok(())
}

/// Adds the envelope to `scheduled` with score = target epoch seconds.
pub async fn enqueue_scheduled(
    conn: &mut deadpool_redis::Connection,
    keys: &Keys,
    job: &JobRecord,
) -> Result<()> {
    debug_assert!(job.scheduled_at > 0, "scheduled job must set scheduled_at");
    let payload = job.to_payload()?;
    let mut pipe = redis::pipe();
    pipe.atomic()
        .zadd(keys.scheduled(), &payload, job.scheduled_at)
        .sadd(keys.known_jobs(), &job.name);
    pipe.query_async::<_, ()>(&mut **conn).await?;
    Ok(())
}

/// Sets `unique:<hash(name, args)>` with `NX`; only on success does it go on to enqueue,
/// stamping `unique: true` into the envelope. Returns `true` if the job was newly enqueued, or
/// `false` if an identical job was already pending/in-progress (§3 invariant 4, §6).
pub async fn enqueue_unique(
    conn: &mut deadpool_redis::Connection,
    keys: &Keys,
    name: impl Into<String>,
    args: Map<String, serde_json::Value>,
) -> Result<bool> {
    let name = name.into();
    let hash = unique_hash(&name, &args);
    let unique_key = keys.unique(&hash);

    let acquired: bool = redis::cmd("SET")
        .arg(&unique_key)
        .arg(1)
        .arg("NX")
        .query_async::<_, Option<String>>(&mut **conn)
        .await
        .map(|v| v.is_some())?;

    if !acquired {
        return Ok(false);
    }

    let mut job = JobRecord::new(JobId::Auto, name, args);
    job.unique = true;
    enqueue(conn, keys, &job).await?;
    Ok(true)
}

/// Clears the uniqueness marker once a uniquely-enqueued job finishes processing (§4.4 step
/// 10), whether it succeeded, failed terminally, or was requeued for retry — a retried unique
/// job is free to be re-enqueued again by a new caller while it waits in `retry`.
pub async fn release_unique_marker(
    conn: &mut deadpool_redis::Connection,
    keys: &Keys,
    name: &str,
    args: &Map<String, serde_json::Value>,
) -> Result<()> {
    let hash = unique_hash(name, args);
    let _: () = conn.del(keys.unique(&hash)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_hash_is_stable_and_order_sensitive_on_name() {
        let args = Map::new();
        let h1 = unique_hash("index", &args);
        let h2 = unique_hash("index", &args);
        assert_eq!(h1, h2);

        let h3 = unique_hash("other", &args);
        assert_ne!(h1, h3);
    }

    #[test]
    fn unique_hash_depends_on_args() {
        let mut args1 = Map::new();
        args1.insert("id".into(), serde_json::json!(7));
        let mut args2 = Map::new();
        args2.insert("id".into(), serde_json::json!(8));

        assert_ne!(unique_hash("index", &args1), unique_hash("index", &args2));
    }
}
