//! The dead-pool reaper (§4.9): periodically looks for pools whose heartbeat has gone stale and
//! rehomes whatever they left in their per-job-type in-progress lists.

use std::time::Duration;

use rand::Rng;
use redis::AsyncCommands;
use tracing::{info, warn};
use workpool_database::RedisPool;
use workpool_shutdown::ShutdownSignal;

use crate::{keys::Keys, scripts::reap::ReapScript};

const BASE_INTERVAL: Duration = Duration::from_secs(10 * 60);
const STALE_CUTOFF: Duration = Duration::from_secs(5 * 60);

pub async fn run(redis: RedisPool, keys: Keys, mut shutdown: ShutdownSignal) {
    loop {
        let jitter = Duration::from_secs(rand::thread_rng().gen_range(0..60));
        tokio::select! {
            _ = tokio::time::sleep(BASE_INTERVAL + jitter) => {}
            _ = shutdown.until_triggered() => return,
        }

        if let Err(e) = sweep(&redis, &keys).await {
            warn!(error = %e, "dead-pool sweep failed");
        }
    }
}

async fn sweep(redis: &RedisPool, keys: &Keys) -> crate::error::Result<()> {
    let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;

    let pool_ids: Vec<String> = conn.smembers(keys.worker_pools()).await?;
    let now = chrono::Utc::now().timestamp();

    for pool_id in pool_ids {
        let heartbeat_key = keys.heartbeat(&pool_id);
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(&heartbeat_key).await?;

        let is_dead = match fields.get("heartbeat_at").and_then(|s| s.parse::<i64>().ok()) {
            Some(ts) => now - ts > STALE_CUTOFF.as_secs() as i64,
            None => true,
        };
        if !is_dead {
            continue;
        }

        let job_names: Vec<&str> = fields
            .get("job_names")
            .map(|s| s.split(',').filter(|n| !n.is_empty()).collect())
            .unwrap_or_default();

        let reap_script = ReapScript::new();
        for name in job_names {
            let dead_inprogress = keys.inprogress(name, &pool_id);
            let jobs_key = keys.jobs(name);
            let lock_key = keys.lock(name);
            let lock_info_key = keys.lock_info(name);

            while reap_script
                .run(&mut conn, &dead_inprogress, &jobs_key, &lock_key, &lock_info_key, &pool_id)
                .await?
                .is_some()
            {}
        }

        let _: () = conn.srem(keys.worker_pools(), &pool_id).await?;
        let _: () = conn.del(&heartbeat_key).await?;
        info!(pool_id = %pool_id, "reaped dead worker pool");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_cutoff_matches_spec_default() {
        assert_eq!(STALE_CUTOFF, Duration::from_secs(5 * 60));
    }

    #[test]
    fn base_interval_matches_spec_default() {
        assert_eq!(BASE_INTERVAL, Duration::from_secs(10 * 60));
    }
}
