//! The registered, pool-local configuration for one named class of jobs (§3 "Job type").

use std::{sync::Arc, time::Duration};

use crate::{
    job::JobRecord,
    middleware::{ComposedHandler, Hook, Middleware},
};

/// Large enough to behave as "effectively infinite" without needing a real sentinel value in
/// the timeout arithmetic (§4.4 step 3: "use a large sentinel ~14 days").
pub const EFFECTIVE_INFINITE_TIMEOUT: Duration = Duration::from_secs(14 * 24 * 60 * 60);

pub const DEFAULT_PRIORITY: u32 = 1;
pub const MAX_PRIORITY: u32 = 100_000;
pub const DEFAULT_MAX_FAILS: u32 = 4;

/// `fails⁴ + 15 + rand(0, 30) × (fails + 1)`, in seconds (§4.5).
pub fn default_backoff(job: &JobRecord) -> i64 {
    let fails = job.fails as i64;
    let jitter = rand::random::<f64>() * 30.0 * (fails as f64 + 1.0);
    fails.pow(4) + 15 + jitter as i64
}

pub type BackoffFn = Arc<dyn Fn(&JobRecord) -> i64 + Send + Sync>;

pub struct JobType<C: Send + Sync + 'static> {
    pub name: String,
    pub priority: u32,
    pub max_fails: u32,
    pub skip_dead: bool,
    /// 0 means unbounded.
    pub max_concurrency: u32,
    pub backoff: BackoffFn,
    /// Epoch seconds; jobs scheduled before this are dropped outright (§4.4 step 2). 0 disables
    /// the check.
    pub starting_deadline: i64,
    pub retry_on_start: bool,
    pub timeout: Duration,
    pub(crate) handler: ComposedHandler<C>,
    pub(crate) middleware: Vec<Arc<dyn Middleware<C>>>,
    pub(crate) hooks: Vec<Hook<C>>,
}

pub struct JobTypeBuilder<C: Send + Sync + 'static> {
    name: String,
    priority: u32,
    max_fails: u32,
    skip_dead: bool,
    max_concurrency: u32,
    backoff: BackoffFn,
    starting_deadline: i64,
    retry_on_start: bool,
    timeout: Duration,
    handler: ComposedHandler<C>,
    middleware: Vec<Arc<dyn Middleware<C>>>,
    hooks: Vec<Hook<C>>,
}

impl<C: Send + Sync + 'static> JobTypeBuilder<C> {
    pub fn new(name: impl Into<String>, handler: ComposedHandler<C>) -> Self {
        JobTypeBuilder {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            max_fails: DEFAULT_MAX_FAILS,
            skip_dead: false,
            max_concurrency: 0,
            backoff: Arc::new(default_backoff),
            starting_deadline: 0,
            retry_on_start: false,
            timeout: EFFECTIVE_INFINITE_TIMEOUT,
            handler,
            middleware: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_fails(mut self, max_fails: u32) -> Self {
        self.max_fails = max_fails;
        self
    }

    pub fn skip_dead(mut self, skip_dead: bool) -> Self {
        self.skip_dead = skip_dead;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn backoff(mut self, backoff: BackoffFn) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn starting_deadline(mut self, epoch_secs: i64) -> Self {
        self.starting_deadline = epoch_secs;
        self
    }

    pub fn retry_on_start(mut self, retry_on_start: bool) -> Self {
        self.retry_on_start = retry_on_start;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            EFFECTIVE_INFINITE_TIMEOUT
        } else {
            timeout
        };
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

    pub fn build(self) -> crate::error::Result<JobType<C>> {
        if self.priority < 1 || self.priority > MAX_PRIORITY {
            return Err(crate::error::Error::InvalidPriority(self.priority));
        }

        Ok(JobType {
            name: self.name,
            priority: self.priority,
            max_fails: self.max_fails,
            skip_dead: self.skip_dead,
            max_concurrency: self.max_concurrency,
            backoff: self.backoff,
            starting_deadline: self.starting_deadline,
            retry_on_start: self.retry_on_start,
            timeout: self.timeout,
            handler: self.handler,
            middleware: self.middleware,
            hooks: self.hooks,
        })
    }
}

/// The per-job-type state a worker actually dispatches against: pool-level middleware and
/// hooks already folded in by [`crate::pool::WorkerPoolBuilder::start`], so a worker never has
/// to know about pool-level configuration at all.
pub struct RuntimeJobType<C: Send + Sync + 'static> {
    pub name: String,
    pub priority: u32,
    pub max_fails: u32,
    pub skip_dead: bool,
    pub backoff: BackoffFn,
    pub starting_deadline: i64,
    pub timeout: Duration,
    pub composed: ComposedHandler<C>,
    pub hooks: Vec<Hook<C>>,
}

impl<C: Send + Sync + 'static> RuntimeJobType<C> {
    /// Folds pool-level middleware/hooks in front of this job type's own, composing once so
    /// per-job dispatch is just invoking the result (§4.6).
    pub fn build(
        jt: JobType<C>,
        pool_middleware: &[Arc<dyn Middleware<C>>],
        pool_hooks: &[Hook<C>],
    ) -> Self {
        let mut middleware = pool_middleware.to_vec();
        middleware.extend(jt.middleware);
        let mut hooks = pool_hooks.to_vec();
        hooks.extend(jt.hooks);

        RuntimeJobType {
            name: jt.name,
            priority: jt.priority,
            max_fails: jt.max_fails,
            skip_dead: jt.skip_dead,
            backoff: jt.backoff,
            starting_deadline: jt.starting_deadline,
            timeout: jt.timeout,
            composed: crate::middleware::compose(middleware, jt.handler),
            hooks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{job::JobId, middleware::generic_handler};

    fn noop_handler() -> ComposedHandler<()> {
        generic_handler(|_job| async move { Ok(()) })
    }

    #[test]
    fn rejects_priority_out_of_range() {
        let built = JobTypeBuilder::new("x", noop_handler())
            .priority(0)
            .build();
        assert!(built.is_err());

        let built = JobTypeBuilder::new("x", noop_handler())
            .priority(100_001)
            .build();
        assert!(built.is_err());
    }

    #[test]
    fn defaults_match_spec() {
        let jt = JobTypeBuilder::new("x", noop_handler()).build().unwrap();
        assert_eq!(jt.priority, DEFAULT_PRIORITY);
        assert_eq!(jt.max_fails, DEFAULT_MAX_FAILS);
        assert_eq!(jt.max_concurrency, 0);
        assert!(!jt.skip_dead);
        assert_eq!(jt.timeout, EFFECTIVE_INFINITE_TIMEOUT);
    }

    #[test]
    fn default_backoff_grows_with_fails_and_has_lower_bound() {
        let mut job = JobRecord::new(JobId::Auto, "flaky", Default::default());
        job.fails = 0;
        let b0 = default_backoff(&job);
        assert!(b0 >= 15 && b0 < 15 + 30);

        job.fails = 3;
        let b3 = default_backoff(&job);
        assert!(b3 >= 3i64.pow(4) + 15);
    }
}
