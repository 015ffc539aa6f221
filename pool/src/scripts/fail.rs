//! The retry-or-dead routing script (§4.5): removes a failed job from its in-progress list,
//! decrements its locks, and — in the same atomic batch — inserts the updated job record into
//! `retry` or `dead` (or drops it entirely), so no intermediate state is ever observable where
//! the job exists in neither place.

use lazy_static::lazy_static;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailRoute {
    Retry,
    Dead,
    Drop,
}

impl FailRoute {
    fn as_str(&self) -> &'static str {
        match self {
            FailRoute::Retry => "retry",
            FailRoute::Dead => "dead",
            FailRoute::Drop => "drop",
        }
    }
}

// KEYS: 1. inprogress list  2. lock  3. lock_info  4. target sorted set (retry or dead)
// ARGV: 1. old payload (to remove from inprogress)  2. pool id  3. new payload (updated job
//          record)  4. score (due epoch for retry, or failed-at epoch for dead)  5. route
const FAIL_SCRIPT: &str = r##"
local removed = redis.call("LREM", KEYS[1], 1, ARGV[1])
if removed > 0 then
    redis.call("DECR", KEYS[2])
    redis.call("HINCRBY", KEYS[3], ARGV[2], -1)
end
if ARGV[5] == "retry" or ARGV[5] == "dead" then
    redis.call("ZADD", KEYS[4], ARGV[4], ARGV[3])
end
return removed
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(FAIL_SCRIPT);
}

pub struct FailScript(&'static redis::Script);

impl FailScript {
    pub fn new() -> Self {
        FailScript(&SCRIPT)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        inprogress_key: &str,
        lock_key: &str,
        lock_info_key: &str,
        target_set_key: &str,
        old_payload: &str,
        pool_id: &str,
        new_payload: &str,
        score: i64,
        route: FailRoute,
    ) -> Result<bool> {
        let removed: i64 = self
            .0
            .key(inprogress_key)
            .key(lock_key)
            .key(lock_info_key)
            .key(target_set_key)
            .arg(old_payload)
            .arg(pool_id)
            .arg(new_payload)
            .arg(score)
            .arg(route.as_str())
            .invoke_async(&mut **conn)
            .await?;
        Ok(removed > 0)
    }
}

impl Default for FailScript {
    fn default() -> Self {
        Self::new()
    }
}
