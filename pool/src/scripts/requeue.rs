//! Atomically moves one due entry out of a time-sorted set (`retry` or `scheduled`) and onto
//! the tail of its job-name's pending list (§4.7). The caller has already decoded the payload
//! to find its `name`; this script only has to guarantee the remove-then-push pair is
//! indivisible so a job can never vanish between the two steps.

use lazy_static::lazy_static;

use crate::error::Result;

// KEYS: 1. source sorted set  2. destination jobs:<name> list
// ARGV: 1. member payload
const REQUEUE_SCRIPT: &str = r##"
local removed = redis.call("ZREM", KEYS[1], ARGV[1])
if removed > 0 then
    redis.call("LPUSH", KEYS[2], ARGV[1])
end
return removed
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(REQUEUE_SCRIPT);
}

pub struct RequeueScript(&'static redis::Script);

impl RequeueScript {
    pub fn new() -> Self {
        RequeueScript(&SCRIPT)
    }

    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        source_set_key: &str,
        dest_list_key: &str,
        payload: &str,
    ) -> Result<bool> {
        let removed: i64 = self
            .0
            .key(source_set_key)
            .key(dest_list_key)
            .arg(payload)
            .invoke_async(&mut **conn)
            .await?;
        Ok(removed > 0)
    }
}

impl Default for RequeueScript {
    fn default() -> Self {
        Self::new()
    }
}
