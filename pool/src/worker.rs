//! The per-worker execution loop (§4.3) and job processing (§4.4). Each worker owns no state
//! another task reaches into directly; it reacts only to its own timer and a small signal
//! channel from the pool.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use workpool_database::RedisPool;
use workpool_shutdown::ShutdownSignal;

use crate::{
    enqueue,
    job::JobRecord,
    job_type::RuntimeJobType,
    keys::{JobTypeKeys, Keys},
    middleware::{run_hooks, HandlerError, JobOutcome},
    observer, sampler,
    scripts::{
        complete::CompleteScript,
        fail::{FailRoute, FailScript},
        fetch::FetchScript,
    },
};

/// Idle-fetch backoff ladder, indexed by `min(consecutive_idle_fetches, len - 1)` (§4.3).
const IDLE_BACKOFF_LADDER_MS: [u64; 5] = [0, 10, 100, 1000, 5000];

/// A control message delivered to a single worker by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    Stop,
    Drain,
    Clear,
}

pub struct Worker<C: Default + Send + Sync + 'static> {
    pub id: String,
    pub pool_id: String,
    redis: RedisPool,
    keys: Keys,
    job_types: Arc<HashMap<String, Arc<RuntimeJobType<C>>>>,
    signals: mpsc::Receiver<WorkerSignal>,
    drain_complete: watch::Sender<bool>,
    shutdown: ShutdownSignal,
    /// A signal observed mid-job (while only `Clear` was actionable) and deferred to the top
    /// of [`Worker::run`]'s loop once the job finishes.
    pending: Option<WorkerSignal>,
}

/// What the fetch script handed back: the decoded job, which job type (if any is registered)
/// it belongs to, the key tuple it was sampled with, and the raw payload exactly as stored in
/// `inprogress` (needed verbatim for the `LREM` in every completion path).
struct Fetched<C: Default + Send + Sync + 'static> {
    job: JobRecord,
    job_type: Option<Arc<RuntimeJobType<C>>>,
    keys: JobTypeKeys,
    raw_payload: String,
}

impl<C: Default + Send + Sync + 'static> Worker<C> {
    pub fn new(
        id: String,
        pool_id: String,
        redis: RedisPool,
        keys: Keys,
        job_types: Arc<HashMap<String, Arc<RuntimeJobType<C>>>>,
        signals: mpsc::Receiver<WorkerSignal>,
        drain_complete: watch::Sender<bool>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Worker {
            id,
            pool_id,
            redis,
            keys,
            job_types,
            signals,
            drain_complete,
            shutdown,
            pending: None,
        }
    }

    pub async fn run(mut self) {
        let mut idle_counter: usize = 0;
        let mut delay = Duration::from_millis(0);
        let mut draining = false;

        loop {
            let signal = match self.pending.take() {
                Some(sig) => Some(sig),
                None => tokio::select! {
                    _ = tokio::time::sleep(delay) => None,
                    sig = self.signals.recv() => Some(sig.unwrap_or(WorkerSignal::Stop)),
                    _ = self.shutdown.until_triggered() => Some(WorkerSignal::Stop),
                },
            };

            match signal {
                Some(WorkerSignal::Stop) => {
                    info!(worker_id = %self.id, "worker stopping");
                    return;
                }
                Some(WorkerSignal::Drain) => {
                    draining = true;
                    delay = Duration::ZERO;
                    continue;
                }
                Some(WorkerSignal::Clear) => {
                    // No job is running between fetches; a stray clear is a no-op.
                    continue;
                }
                None => {}
            }

            match self.fetch_one().await {
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "fetch failed, backing off");
                    delay = Duration::from_millis(10);
                }
                Ok(None) => {
                    if draining {
                        let _ = self.drain_complete.send(true);
                        draining = false;
                    }
                    delay = Duration::from_millis(
                        IDLE_BACKOFF_LADDER_MS[idle_counter.min(IDLE_BACKOFF_LADDER_MS.len() - 1)],
                    );
                    idle_counter += 1;
                }
                Ok(Some(fetched)) => {
                    idle_counter = 0;
                    self.process_job(fetched).await;
                    delay = Duration::ZERO;
                }
            }
        }
    }

    async fn fetch_one(&mut self) -> crate::error::Result<Option<Fetched<C>>> {
        let weights: Vec<(String, u32)> = self
            .job_types
            .values()
            .map(|jt| (jt.name.clone(), jt.priority))
            .collect();
        let sampled = sampler::sample(&self.keys, &self.pool_id, &weights);
        if sampled.is_empty() {
            return Ok(None);
        }

        let mut conn = self
            .redis
            .pool()
            .get()
            .await
            .map_err(workpool_database::Error::from)?;
        let Some(fetched) = FetchScript::new().run(&mut conn, &sampled, &self.pool_id).await?
        else {
            return Ok(None);
        };

        let sample_entry = &sampled[fetched.job_type_index];
        let job_type = self.job_types.get(&sample_entry.name).cloned();

        let job = match JobRecord::from_payload(&fetched.payload) {
            Ok(job) => job,
            Err(e) => {
                // A malformed payload can't be routed anywhere meaningful; drop it from
                // in-progress rather than wedging the job type's lock forever.
                warn!(worker_id = %self.id, error = %e, "dropping unparseable job payload");
                let _ = CompleteScript::new()
                    .run(
                        &mut conn,
                        &sample_entry.keys.inprogress,
                        &sample_entry.keys.lock,
                        &sample_entry.keys.lock_info,
                        &fetched.payload,
                        &self.pool_id,
                    )
                    .await;
                return Ok(None);
            }
        };

        Ok(Some(Fetched {
            job,
            job_type,
            keys: sample_entry.keys.clone(),
            raw_payload: fetched.payload,
        }))
    }

    async fn process_job(&mut self, fetched: Fetched<C>) {
        let Fetched {
            mut job,
            job_type,
            keys,
            raw_payload,
        } = fetched;

        let Some(job_type) = job_type else {
            self.route_stray_job(&mut job, &keys, &raw_payload).await;
            return;
        };

        if job_type.starting_deadline > 0
            && job.scheduled_at > 0
            && job.scheduled_at < job_type.starting_deadline
        {
            self.drop_past_deadline(&keys, &raw_payload, &job).await;
            return;
        }

        if let Ok(mut conn) = self.redis.pool().get().await {
            if let Err(e) =
                observer::observe_start(&mut conn, &self.keys, &self.pool_id, &self.id, &job).await
            {
                warn!(worker_id = %self.id, error = %e, "observer write failed");
            }
        }

        let ctx = Arc::new(C::default());
        let handler = job_type.composed.clone();
        let job_for_handler = job.clone();
        let handler_ctx = ctx.clone();
        let handler_task = tokio::spawn(async move { handler(handler_ctx, job_for_handler).await });
        tokio::pin!(handler_task);
        let sleep = tokio::time::sleep(job_type.timeout);
        tokio::pin!(sleep);

        let result = loop {
            tokio::select! {
                res = &mut handler_task => {
                    break match res {
                        Ok(handler_result) => handler_result,
                        Err(join_err) => Err(HandlerError::Failed(anyhow::anyhow!(
                            "handler task panicked: {join_err}"
                        ))),
                    };
                }
                _ = &mut sleep => {
                    break Err(HandlerError::Failed(anyhow::anyhow!("Run Job Timeout")));
                }
                signal = self.signals.recv() => {
                    match signal {
                        Some(WorkerSignal::Clear) => {
                            // Stop waiting on the handler's outcome; it keeps running
                            // detached, and this worker discards whatever it produces
                            // (documented race, see the design notes on clear semantics).
                            return;
                        }
                        // Stop/Drain arriving mid-job can't be handled until the spawned
                        // handler finishes or times out (§5 Cancellation); stash it so
                        // `run`'s loop picks it up on its very next iteration.
                        other => self.pending = Some(other.unwrap_or(WorkerSignal::Stop)),
                    }
                }
            }
        };

        self.finish_job(job, job_type, keys, raw_payload, result, ctx).await;
    }

    async fn route_stray_job(&mut self, job: &mut JobRecord, keys: &JobTypeKeys, raw_payload: &str) {
        job.mark_failed("stray job: no handler");
        let payload = job.to_payload().unwrap_or_else(|_| raw_payload.to_string());
        if let Ok(mut conn) = self.redis.pool().get().await {
            let _ = FailScript::new()
                .run(
                    &mut conn,
                    &keys.inprogress,
                    &keys.lock,
                    &keys.lock_info,
                    &self.keys.dead(),
                    raw_payload,
                    &self.pool_id,
                    &payload,
                    now(),
                    FailRoute::Dead,
                )
                .await;
        }
        warn!(worker_id = %self.id, job_name = %job.name, "stray job: no handler registered");
    }

    async fn drop_past_deadline(&mut self, keys: &JobTypeKeys, raw_payload: &str, job: &JobRecord) {
        if let Ok(mut conn) = self.redis.pool().get().await {
            let _ = CompleteScript::new()
                .run(
                    &mut conn,
                    &keys.inprogress,
                    &keys.lock,
                    &keys.lock_info,
                    raw_payload,
                    &self.pool_id,
                )
                .await;
        }
        info!(worker_id = %self.id, job_id = %job.id, "dropped job past its starting deadline");
    }

    async fn finish_job(
        &mut self,
        mut job: JobRecord,
        job_type: Arc<RuntimeJobType<C>>,
        keys: JobTypeKeys,
        raw_payload: String,
        result: Result<(), HandlerError>,
        ctx: Arc<C>,
    ) {
        let mut conn = match self.redis.pool().get().await {
            Ok(c) => c,
            Err(e) => {
                warn!(worker_id = %self.id, error = %e, "could not get connection to finalize job");
                return;
            }
        };

        if let Err(e) = observer::observe_done(&mut conn, &self.keys, &self.pool_id, &self.id).await
        {
            warn!(worker_id = %self.id, error = %e, "observer write failed");
        }

        let hook_outcome = match &result {
            Ok(()) => JobOutcome::Success,
            Err(e) => JobOutcome::Failed(e.message()),
        };
        run_hooks(&job_type.hooks, ctx, &job, hook_outcome).await;

        match result {
            Ok(()) => {
                let _ = CompleteScript::new()
                    .run(
                        &mut conn,
                        &keys.inprogress,
                        &keys.lock,
                        &keys.lock_info,
                        &raw_payload,
                        &self.pool_id,
                    )
                    .await;
            }
            Err(err) => {
                job.mark_failed(&err.message());
                let fails_remaining = job_type.max_fails as i64 - job.fails as i64;
                let route = if err.is_no_retry() {
                    if job_type.skip_dead {
                        FailRoute::Drop
                    } else {
                        FailRoute::Dead
                    }
                } else if fails_remaining > 0 {
                    FailRoute::Retry
                } else if !job_type.skip_dead {
                    FailRoute::Dead
                } else {
                    FailRoute::Drop
                };

                let score = match route {
                    FailRoute::Retry => now() + (job_type.backoff)(&job),
                    FailRoute::Dead | FailRoute::Drop => now(),
                };
                let target_set = match route {
                    FailRoute::Retry => self.keys.retry(),
                    FailRoute::Dead => self.keys.dead(),
                    FailRoute::Drop => String::new(),
                };

                match job.to_payload() {
                    Ok(payload) => {
                        let _ = FailScript::new()
                            .run(
                                &mut conn,
                                &keys.inprogress,
                                &keys.lock,
                                &keys.lock_info,
                                &target_set,
                                &raw_payload,
                                &self.pool_id,
                                &payload,
                                score,
                                route,
                            )
                            .await;
                    }
                    Err(e) => {
                        // Documented leak (§9): a serialization failure here leaves the job
                        // orphaned in in-progress rather than guessing at a payload to route.
                        warn!(worker_id = %self.id, job_id = %job.id, error = %e, "failed to serialize job for retry/dead routing");
                    }
                }
            }
        }

        if job.unique {
            let _ =
                enqueue::release_unique_marker(&mut conn, &self.keys, &job.name, &job.args).await;
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
