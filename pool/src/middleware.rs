//! The middleware and hook chain runner (§4.6). A fresh context instance is constructed per
//! job; the chain is built once at registration time (not re-built per job, per the design
//! notes) into a single composed closure, then invoked with that job's context and record.
//!
//! Two explicit registration shapes replace the source's dynamic signature discovery: a
//! "generic" shape that only ever sees the job, and a "context" shape that also receives the
//! per-job context. Both middleware and handlers can be registered either way; the runner
//! doesn't need to distinguish them once they're wrapped into a [`ComposedHandler`].

use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;

use crate::job::JobRecord;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler error that carries whether it should bypass the retry ladder entirely (§4.5, §7).
#[derive(Debug)]
pub enum HandlerError {
    Failed(anyhow::Error),
    NoRetry(anyhow::Error),
}

impl HandlerError {
    pub fn message(&self) -> String {
        match self {
            HandlerError::Failed(e) => e.to_string(),
            HandlerError::NoRetry(e) => e.to_string(),
        }
    }

    pub fn is_no_retry(&self) -> bool {
        matches!(self, HandlerError::NoRetry(_))
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerResult = Result<(), HandlerError>;

/// The outcome passed to the hook chain once the handler has returned or timed out (§4.6).
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success,
    Failed(String),
}

/// A handler or middleware continuation composed at registration time into one closure per
/// job type. Cloning is cheap (it's an `Arc`); a fresh clone is threaded through the chain for
/// each invocation since each link needs to capture `next` by value to cross an `await`.
pub type ComposedHandler<C> =
    Arc<dyn Fn(Arc<C>, JobRecord) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub type Hook<C> = Arc<dyn Fn(Arc<C>, JobRecord, JobOutcome) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Middleware<C: Send + Sync + 'static>: Send + Sync {
    async fn call(&self, ctx: Arc<C>, job: JobRecord, next: ComposedHandler<C>) -> HandlerResult;
}

/// Wraps a middleware that only wants the job, not the context (the "generic" shape).
pub struct GenericMiddlewareFn<F>(pub F);

#[async_trait]
impl<C, F, Fut> Middleware<C> for GenericMiddlewareFn<F>
where
    C: Send + Sync + 'static,
    F: Fn(JobRecord, ComposedHandler<C>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn call(&self, _ctx: Arc<C>, job: JobRecord, next: ComposedHandler<C>) -> HandlerResult {
        (self.0)(job, next).await
    }
}

/// Wraps a middleware that receives the per-job context (the "context" shape).
pub struct ContextMiddlewareFn<F>(pub F);

#[async_trait]
impl<C, F, Fut> Middleware<C> for ContextMiddlewareFn<F>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, JobRecord, ComposedHandler<C>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn call(&self, ctx: Arc<C>, job: JobRecord, next: ComposedHandler<C>) -> HandlerResult {
        (self.0)(ctx, job, next).await
    }
}

/// Registers a handler that only sees the job (`registerGenericHandler` in the design notes).
pub fn generic_handler<C, F, Fut>(f: F) -> ComposedHandler<C>
where
    C: Send + Sync + 'static,
    F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |_ctx: Arc<C>, job: JobRecord| Box::pin(f(job)) as BoxFuture<'static, HandlerResult>)
}

/// Registers a handler that receives the per-job context (`registerContextHandler`).
pub fn context_handler<C, F, Fut>(f: F) -> ComposedHandler<C>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx: Arc<C>, job: JobRecord| Box::pin(f(ctx, job)) as BoxFuture<'static, HandlerResult>)
}

/// Builds the effective middleware chain (`pool.middleware ++ jobType.middleware`, §4.6) around
/// a handler, composing it once so per-job dispatch is just calling the returned closure.
pub fn compose<C: Send + Sync + 'static>(
    middleware: Vec<Arc<dyn Middleware<C>>>,
    handler: ComposedHandler<C>,
) -> ComposedHandler<C> {
    middleware.into_iter().rev().fold(handler, |next, mw| {
        Arc::new(move |ctx: Arc<C>, job: JobRecord| {
            let mw = mw.clone();
            let next = next.clone();
            Box::pin(async move { mw.call(ctx, job, next).await }) as BoxFuture<'static, HandlerResult>
        })
    })
}

/// Runs the hook chain (`pool.hook ++ jobType.hook`) after the handler returns or times out.
/// Hook errors are logged by the caller and never propagated (§4.6, §7).
pub async fn run_hooks<C: Send + Sync + 'static>(
    hooks: &[Hook<C>],
    ctx: Arc<C>,
    job: &JobRecord,
    outcome: JobOutcome,
) {
    for hook in hooks {
        hook(ctx.clone(), job.clone(), outcome.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Ctx {
        calls: AtomicUsize,
    }

    #[tokio::test]
    async fn composed_chain_runs_middleware_before_handler() {
        let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let o1 = order.clone();
        let mw1 = Arc::new(GenericMiddlewareFn(move |job: JobRecord, next: ComposedHandler<Ctx>| {
            let o1 = o1.clone();
            async move {
                o1.lock().unwrap().push("mw1-before");
                let r = next(Arc::new(Ctx::default()), job).await;
                o1.lock().unwrap().push("mw1-after");
                r
            }
        })) as Arc<dyn Middleware<Ctx>>;

        let o2 = order.clone();
        let handler = generic_handler(move |_job: JobRecord| {
            let o2 = o2.clone();
            async move {
                o2.lock().unwrap().push("handler");
                Ok(())
            }
        });

        let composed = compose(vec![mw1], handler);
        let job = JobRecord::new(crate::job::JobId::Auto, "t", Default::default());
        composed(Arc::new(Ctx::default()), job).await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["mw1-before", "handler", "mw1-after"]
        );
    }

    #[tokio::test]
    async fn context_handler_sees_shared_context() {
        let ctx = Arc::new(Ctx::default());
        let handler = context_handler(|ctx: Arc<Ctx>, _job: JobRecord| async move {
            ctx.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let job = JobRecord::new(crate::job::JobId::Auto, "t", Default::default());
        handler(ctx.clone(), job).await.unwrap();
        assert_eq!(ctx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_retry_error_is_distinguishable() {
        let handler: ComposedHandler<Ctx> =
            generic_handler(|_job: JobRecord| async move {
                Err(HandlerError::NoRetry(anyhow::anyhow!("fatal")))
            });
        let job = JobRecord::new(crate::job::JobId::Auto, "t", Default::default());
        let err = handler(Arc::new(Ctx::default()), job).await.unwrap_err();
        assert!(err.is_no_retry());
    }
}
