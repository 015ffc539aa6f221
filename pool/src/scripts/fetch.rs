//! The atomic fetch script (§4.2): given the sampler's ordered key tuples, picks the first
//! fetchable job, respecting pause flags and per-job-type concurrency caps, and atomically
//! moves it into that job type's in-progress list while bumping the lock counters. The whole
//! decision is made inside one Lua script so no other pool can interleave between the
//! concurrency check and the lock increment.

use lazy_static::lazy_static;

use crate::{error::Result, sampler::SampledJobType};

// KEYS: N groups of 6, one group per sampled job type, in priority-sampled order:
//   jobs, inprogress, paused, lock, lock_info, max_concurrency
// ARGV:
//   1. this pool's id
const FETCH_SCRIPT: &str = r##"
local n = #KEYS / 6
for i = 0, n - 1 do
    local jobs = KEYS[i * 6 + 1]
    local inprogress = KEYS[i * 6 + 2]
    local paused = KEYS[i * 6 + 3]
    local lock = KEYS[i * 6 + 4]
    local lock_info = KEYS[i * 6 + 5]
    local max_concurrency = KEYS[i * 6 + 6]

    local is_paused = redis.call("GET", paused)
    if is_paused == false or is_paused == "0" or is_paused == "" then
        local max_conc = tonumber(redis.call("GET", max_concurrency))
        if max_conc == nil or max_conc <= 0 then
            local payload = redis.call("RPOP", jobs)
            if payload then
                redis.call("LPUSH", inprogress, payload)
                redis.call("INCR", lock)
                redis.call("HINCRBY", lock_info, ARGV[1], 1)
                return {payload, i}
            end
        else
            local cur_lock = tonumber(redis.call("GET", lock)) or 0
            if cur_lock < max_conc then
                local payload = redis.call("RPOP", jobs)
                if payload then
                    redis.call("LPUSH", inprogress, payload)
                    redis.call("INCR", lock)
                    redis.call("HINCRBY", lock_info, ARGV[1], 1)
                    return {payload, i}
                end
            end
        end
    end
end
return nil
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(FETCH_SCRIPT);
}

pub struct FetchScript(&'static redis::Script);

/// One fetched job: its raw JSON payload, and which sampled job type it came from.
pub struct FetchedJob {
    pub payload: String,
    pub job_type_index: usize,
}

impl FetchScript {
    pub fn new() -> Self {
        FetchScript(&SCRIPT)
    }

    pub async fn run(
        &self,
        conn: &mut deadpool_redis::Connection,
        sampled: &[SampledJobType],
        pool_id: &str,
    ) -> Result<Option<FetchedJob>> {
        if sampled.is_empty() {
            return Ok(None);
        }

        let mut iter = sampled.iter();
        let first = iter.next().expect("checked non-empty above");
        let mut invocation = self.0.key(&first.keys.jobs);
        invocation
            .key(&first.keys.inprogress)
            .key(&first.keys.paused)
            .key(&first.keys.lock)
            .key(&first.keys.lock_info)
            .key(&first.keys.max_concurrency);
        for s in iter {
            invocation
                .key(&s.keys.jobs)
                .key(&s.keys.inprogress)
                .key(&s.keys.paused)
                .key(&s.keys.lock)
                .key(&s.keys.lock_info)
                .key(&s.keys.max_concurrency);
        }
        invocation.arg(pool_id);

        let result: Option<(String, usize)> = invocation.invoke_async(&mut **conn).await?;
        Ok(result.map(|(payload, job_type_index)| FetchedJob {
            payload,
            job_type_index,
        }))
    }
}

impl Default for FetchScript {
    fn default() -> Self {
        Self::new()
    }
}
