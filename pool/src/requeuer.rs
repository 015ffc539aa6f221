//! The shared retry/scheduled requeuer (§4.7): one task per source sorted set (`retry` and
//! `scheduled` each get their own), moving due entries back onto their job type's pending list.

use std::{collections::HashSet, sync::Arc, time::Duration};

use rand::Rng;
use redis::AsyncCommands;
use tracing::warn;
use workpool_database::RedisPool;
use workpool_shutdown::ShutdownSignal;

use crate::{job::JobRecord, keys::Keys, scripts::requeue::RequeueScript};

const BASE_INTERVAL: Duration = Duration::from_secs(1);

/// Runs until `shutdown` fires. `known_job_names` is shared with the rest of the pool so newly
/// registered job types become eligible for requeuing without restarting this task.
pub async fn run(
    redis: RedisPool,
    keys: Keys,
    source_set: String,
    known_job_names: Arc<HashSet<String>>,
    mut shutdown: ShutdownSignal,
) {
    let script = RequeueScript::new();

    loop {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        tokio::select! {
            _ = tokio::time::sleep(BASE_INTERVAL + jitter) => {}
            _ = shutdown.until_triggered() => return,
        }

        let mut conn = match redis.pool().get().await {
            Ok(c) => c,
            Err(e) => {
                warn!(set = %source_set, error = %e, "requeuer could not get connection");
                continue;
            }
        };

        let now = chrono::Utc::now().timestamp();
        let due: Vec<String> = match conn.zrangebyscore(&source_set, 0, now).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(set = %source_set, error = %e, "requeuer failed to list due entries");
                continue;
            }
        };

        for payload in due {
            let name = match JobRecord::from_payload(&payload) {
                Ok(job) => job.name,
                Err(e) => {
                    warn!(set = %source_set, error = %e, "requeuer found an unparseable entry");
                    continue;
                }
            };

            if !known_job_names.contains(&name) {
                // Belongs to a job type no pool here has registered; leave it for whichever
                // fleet tenant owns it.
                continue;
            }

            let dest = keys.jobs(&name);
            if let Err(e) = script.run(&mut conn, &source_set, &dest, &payload).await {
                warn!(set = %source_set, job_name = %name, error = %e, "requeue failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_interval_is_one_second() {
        assert_eq!(BASE_INTERVAL, Duration::from_secs(1));
    }
}
