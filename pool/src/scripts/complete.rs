//! Atomic removal of a successfully-finished job from its in-progress list, with the matching
//! lock decrements (§4.4 step 9, invariant 2).

use lazy_static::lazy_static;

use crate::error::Result;

// KEYS: 1. inprogress list  2. lock  3. lock_info
// ARGV: 1. job payload (as stored in the inprogress list)  2. pool id
const COMPLETE_SCRIPT: &str = r##"
local removed = redis.call("LREM", KEYS[1], 1, ARGV[1])
if removed > 0 then
    redis.call("DECR", KEYS[2])
    redis.call("HINCRBY", KEYS[3], ARGV[2], -1)
end
return removed
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(COMPLETE_SCRIPT);
}

pub struct CompleteScript(&'static redis::Script);

impl CompleteScript {
    pub fn new() -> Self {
        CompleteScript(&SCRIPT)
    }

    /// Returns `true` if the job was actually found (and removed) from the in-progress list.
    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        inprogress_key: &str,
        lock_key: &str,
        lock_info_key: &str,
        payload: &str,
        pool_id: &str,
    ) -> Result<bool> {
        let removed: i64 = self
            .0
            .key(inprogress_key)
            .key(lock_key)
            .key(lock_info_key)
            .arg(payload)
            .arg(pool_id)
            .invoke_async(&mut **conn)
            .await?;
        Ok(removed > 0)
    }
}

impl Default for CompleteScript {
    fn default() -> Self {
        Self::new()
    }
}
