//! Rehomes one job from a dead pool's in-progress list back to its pending list, decrementing
//! locks in the same step (§4.9). The reaper calls this repeatedly until it returns `None`; the
//! in-progress list's emptiness is what makes concurrent reapers idempotent — whichever reaper
//! gets there first drains it, and the rest find nothing left to do.

use lazy_static::lazy_static;

use crate::error::Result;

// KEYS: 1. dead pool's `<name>:<deadPool>:inprogress`  2. `jobs:<name>`  3. lock  4. lock_info
// ARGV: 1. dead pool id
const REAP_SCRIPT: &str = r##"
local payload = redis.call("RPOPLPUSH", KEYS[1], KEYS[2])
if payload then
    redis.call("DECR", KEYS[3])
    redis.call("HINCRBY", KEYS[4], ARGV[1], -1)
end
return payload
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(REAP_SCRIPT);
}

pub struct ReapScript(&'static redis::Script);

impl ReapScript {
    pub fn new() -> Self {
        ReapScript(&SCRIPT)
    }

    /// Moves (up to) one job. Returns `None` once the dead pool's in-progress list is empty.
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        dead_inprogress_key: &str,
        jobs_key: &str,
        lock_key: &str,
        lock_info_key: &str,
        dead_pool_id: &str,
    ) -> Result<Option<String>> {
        let payload: Option<String> = self
            .0
            .key(dead_inprogress_key)
            .key(jobs_key)
            .key(lock_key)
            .key(lock_info_key)
            .arg(dead_pool_id)
            .invoke_async(&mut **conn)
            .await?;
        Ok(payload)
    }
}

impl Default for ReapScript {
    fn default() -> Self {
        Self::new()
    }
}
