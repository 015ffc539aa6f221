//! The top-level worker pool: registration surface plus the orchestration of workers,
//! heartbeater, requeuers, reaper, and periodic enqueuer as independent tasks wired to one
//! shared [`ShutdownSignal`] (§5).

use std::{collections::HashMap, collections::HashSet, sync::Arc};

use redis::AsyncCommands;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use workpool_database::RedisPool;
use workpool_shutdown::PoolShutdown;

use crate::{
    error::{Error, Result},
    job_type::{JobType, RuntimeJobType},
    keys::Keys,
    middleware::{Hook, Middleware},
    periodic::PeriodicSpec,
    scripts::reap::ReapScript,
    worker::{Worker, WorkerSignal},
    {heartbeat, periodic, reaper, requeuer},
};

pub struct PoolConfig {
    pub namespace: String,
    pub concurrency: usize,
    /// Stable across restarts only if the caller sets it; a random id is generated otherwise.
    /// Only a stable id makes any registered `retryOnStart` job type's crash recovery apply.
    pub pool_id: Option<String>,
}

impl PoolConfig {
    pub fn new(namespace: impl Into<String>, concurrency: usize) -> Self {
        PoolConfig {
            namespace: namespace.into(),
            concurrency,
            pool_id: None,
        }
    }
}

/// Registration surface. Mutating methods are only safe to call before [`WorkerPoolBuilder::start`]
/// (§5 shared-resource policy); `start` consumes the builder so nothing can register afterward.
pub struct WorkerPoolBuilder<C: Default + Send + Sync + 'static> {
    redis: RedisPool,
    config: PoolConfig,
    job_types: HashMap<String, JobType<C>>,
    middleware: Vec<Arc<dyn Middleware<C>>>,
    hooks: Vec<Hook<C>>,
    periodic: Vec<(String, String)>,
}

impl<C: Default + Send + Sync + 'static> WorkerPoolBuilder<C> {
    pub fn new(redis: RedisPool, config: PoolConfig) -> Self {
        WorkerPoolBuilder {
            redis,
            config,
            job_types: HashMap::new(),
            middleware: Vec::new(),
            hooks: Vec::new(),
            periodic: Vec::new(),
        }
    }

    pub fn register(mut self, job_type: JobType<C>) -> Self {
        self.job_types.insert(job_type.name.clone(), job_type);
        self
    }

    pub fn middleware(mut self, mw: Arc<dyn Middleware<C>>) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn hook(mut self, hook: Hook<C>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn periodic(mut self, job_name: impl Into<String>, cron_expr: impl Into<String>) -> Self {
        self.periodic.push((job_name.into(), cron_expr.into()));
        self
    }

    pub async fn start(self, shutdown: &PoolShutdown) -> Result<WorkerPool> {
        if self.job_types.is_empty() {
            return Err(Error::ConfigError(
                "a worker pool must register at least one job type before starting".into(),
            ));
        }

        let pool_id = self.config.pool_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let keys = Keys::new(self.config.namespace.clone());

        let periodic_specs = self
            .periodic
            .iter()
            .map(|(name, cron_expr)| PeriodicSpec::parse(name.clone(), cron_expr))
            .collect::<Result<Vec<_>>>()?;

        let mut runtime_job_types = HashMap::new();
        let mut known_job_names = HashSet::new();
        {
            let mut conn = self.redis.pool().get().await.map_err(workpool_database::Error::from)?;
            for (name, jt) in self.job_types {
                known_job_names.insert(name.clone());

                let max_concurrency_key = keys.max_concurrency(&name);
                if jt.max_concurrency > 0 {
                    let _: () = conn.set(&max_concurrency_key, jt.max_concurrency).await?;
                } else {
                    let _: () = conn.del(&max_concurrency_key).await?;
                }
                let _: () = conn.sadd(keys.known_jobs(), &name).await?;

                if jt.retry_on_start {
                    recover_own_inprogress(&mut conn, &keys, &name, &pool_id).await?;
                }

                runtime_job_types.insert(
                    name,
                    Arc::new(RuntimeJobType::build(jt, &self.middleware, &self.hooks)),
                );
            }
        }
        let runtime_job_types = Arc::new(runtime_job_types);

        let mut worker_signals = Vec::with_capacity(self.config.concurrency);
        let mut drain_rxs = Vec::with_capacity(self.config.concurrency);
        let mut tasks = Vec::new();

        for i in 0..self.config.concurrency {
            let (signal_tx, signal_rx) = mpsc::channel(8);
            let (drain_tx, drain_rx) = watch::channel(false);
            let worker = Worker::new(
                format!("{}-{}", pool_id, i),
                pool_id.clone(),
                self.redis.clone(),
                keys.clone(),
                runtime_job_types.clone(),
                signal_rx,
                drain_tx,
                shutdown.signal(),
            );
            tasks.push(tokio::spawn(worker.run()));
            worker_signals.push(signal_tx);
            drain_rxs.push(drain_rx);
        }

        let known_job_names = Arc::new(known_job_names);

        tasks.push(tokio::spawn(heartbeat::run(
            self.redis.clone(),
            keys.clone(),
            heartbeat::HeartbeatInfo::new(
                pool_id.clone(),
                known_job_names.iter().cloned().collect(),
                self.config.concurrency,
                (0..self.config.concurrency)
                    .map(|i| format!("{}-{}", pool_id, i))
                    .collect(),
            ),
            shutdown.signal(),
        )));

        tasks.push(tokio::spawn(requeuer::run(
            self.redis.clone(),
            keys.clone(),
            keys.retry(),
            known_job_names.clone(),
            shutdown.signal(),
        )));
        tasks.push(tokio::spawn(requeuer::run(
            self.redis.clone(),
            keys.clone(),
            keys.scheduled(),
            known_job_names.clone(),
            shutdown.signal(),
        )));

        tasks.push(tokio::spawn(reaper::run(
            self.redis.clone(),
            keys.clone(),
            shutdown.signal(),
        )));

        if !periodic_specs.is_empty() {
            tasks.push(tokio::spawn(periodic::run(
                self.redis.clone(),
                keys.clone(),
                pool_id.clone(),
                periodic_specs,
                shutdown.signal(),
            )));
        }

        info!(pool_id = %pool_id, concurrency = self.config.concurrency, "worker pool started");

        Ok(WorkerPool {
            pool_id,
            redis: self.redis,
            keys,
            known_job_names,
            worker_signals,
            drain_rxs,
            tasks,
        })
    }
}

/// Crash-recovery for `retryOnStart` job types: rehomes this pool's own leftover in-progress
/// entries the same way the dead-pool reaper rehomes another pool's — only meaningful if
/// `pool_id` is stable across restarts (§9 Open Question).
async fn recover_own_inprogress(
    conn: &mut deadpool_redis::Connection,
    keys: &Keys,
    name: &str,
    pool_id: &str,
) -> Result<()> {
    let inprogress = keys.inprogress(name, pool_id);
    let jobs_key = keys.jobs(name);
    let lock_key = keys.lock(name);
    let lock_info_key = keys.lock_info(name);
    let script = ReapScript::new();

    while script
        .run(conn, &inprogress, &jobs_key, &lock_key, &lock_info_key, pool_id)
        .await?
        .is_some()
    {}
    Ok(())
}

/// A running pool. Holds the handles needed to drain or stop it; dropping this without calling
/// either leaves its tasks running until the shared [`PoolShutdown`] fires. Not generic
/// over the context type: once workers are spawned, nothing outside them needs to know it.
pub struct WorkerPool {
    pool_id: String,
    redis: RedisPool,
    keys: Keys,
    known_job_names: Arc<HashSet<String>>,
    worker_signals: Vec<mpsc::Sender<WorkerSignal>>,
    drain_rxs: Vec<watch::Receiver<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn redis(&self) -> &RedisPool {
        &self.redis
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn known_job_names(&self) -> &HashSet<String> {
        &self.known_job_names
    }

    /// Blocks until every worker's pending-list view has gone empty (§5 Cancellation).
    pub async fn drain(&mut self) {
        for tx in &self.worker_signals {
            let _ = tx.send(WorkerSignal::Drain).await;
        }
        for rx in &mut self.drain_rxs {
            let _ = rx.changed().await;
        }
    }

    /// Sends a clear signal to every worker, discarding whatever job each one is mid-processing.
    pub async fn clear_all(&self) {
        for tx in &self.worker_signals {
            let _ = tx.send(WorkerSignal::Clear).await;
        }
    }

    /// Cooperative shutdown (§6 "Operational surface"): signal every worker to stop, trigger
    /// the shared [`PoolShutdown`] so the heartbeater, requeuers, reaper, and periodic enqueuer
    /// see it too, then wait for every spawned task to exit. Triggering is what actually stops
    /// those non-worker tasks — they only ever select on the shared signal, never on
    /// `worker_signals` — so a caller that drops the pool without routing its `shutdown` here
    /// (or firing it some other way) leaves them running forever.
    pub async fn stop(mut self, shutdown: &mut PoolShutdown) -> Result<()> {
        shutdown.trigger();
        for tx in &self.worker_signals {
            let _ = tx.send(WorkerSignal::Stop).await;
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        Ok(())
    }
}
