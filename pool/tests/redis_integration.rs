//! Integration tests against a live Redis-compatible server, gated behind `test_redis` since
//! they need `REDIS_URL` set. Structured after the teacher's `queues/lib.rs::run_queue_test`: a
//! uniquely-namespaced pool per test, with a `SCAN`-and-`DEL` sweep for cleanup regardless of
//! whether the test body panicked.
#![cfg(feature = "test_redis")]

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{atomic::{AtomicUsize, Ordering}, Arc},
};

use futures::FutureExt;
use redis::AsyncCommands;
use serde_json::Map;
use workpool_database::RedisPool;
use workpool_pool::{
    context_handler, enqueue, enqueue_unique, job_type_status,
    sampler::SampledJobType,
    scripts::{
        complete::CompleteScript,
        fail::{FailRoute, FailScript},
        fetch::FetchScript,
    },
    JobId, JobOutcome, JobRecord, JobTypeBuilder, Keys, PoolConfig, WorkerPoolBuilder,
};
use workpool_shutdown::PoolShutdown;

async fn run_test<T, Fut>(test: T)
where
    T: FnOnce(RedisPool, Keys, String) -> Fut,
    Fut: Future<Output = ()>,
{
    dotenv::dotenv().ok();
    let namespace = format!("test-{}", uuid::Uuid::new_v4());
    let redis = RedisPool::new(None).expect("creating redis pool");
    let keys = Keys::new(namespace.clone());

    let result = AssertUnwindSafe(test(redis.clone(), keys, namespace.clone()))
        .catch_unwind()
        .await;

    let mut conn = redis.pool().get().await.expect("cleanup: acquiring connection");
    let key_pattern = format!("{}:*", namespace);
    let mut cmd = redis::cmd("SCAN");
    let mut iter: redis::AsyncIter<String> = cmd
        .cursor_arg(0)
        .arg("MATCH")
        .arg(&key_pattern)
        .arg("COUNT")
        .arg(100)
        .clone()
        .iter_async(&mut *conn)
        .await
        .expect("cleanup: scanning keyspace");

    let mut del_cmd = redis::cmd("DEL");
    let mut any = false;
    while let Some(key) = iter.next_item().await {
        any = true;
        del_cmd.arg(key);
    }
    if any {
        let _: () = del_cmd.query_async(&mut *conn).await.expect("cleanup: deleting keys");
    }

    result.expect("test panicked");
}

fn sampled_for(keys: &Keys, name: &str, pool_id: &str) -> Vec<SampledJobType> {
    vec![SampledJobType {
        name: name.to_string(),
        keys: keys.job_type_keys(name, pool_id),
    }]
}

#[tokio::test]
async fn enqueue_then_fetch_then_complete_round_trips() {
    run_test(|redis, keys, _ns| async move {
        let mut conn = redis.pool().get().await.unwrap();
        let job = JobRecord::new(JobId::Value("job-1"), "send_email", Map::new());
        enqueue(&mut conn, &keys, &job).await.unwrap();

        let sampled = sampled_for(&keys, "send_email", "pool-a");
        let fetched = FetchScript::new().run(&mut conn, &sampled, "pool-a").await.unwrap();
        let fetched = fetched.expect("a job should have been fetched");
        let fetched_job = JobRecord::from_payload(&fetched.payload).unwrap();
        assert_eq!(fetched_job.id, "job-1");

        let job_type_keys = keys.job_type_keys("send_email", "pool-a");
        let removed = CompleteScript::new()
            .run(
                &mut conn,
                &job_type_keys.inprogress,
                &job_type_keys.lock,
                &job_type_keys.lock_info,
                &fetched.payload,
                "pool-a",
            )
            .await
            .unwrap();
        assert!(removed);

        let status = job_type_status(&redis, &keys, "send_email").await.unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.lock, 0);
    })
    .await;
}

#[tokio::test]
async fn enqueue_unique_rejects_duplicate_while_pending() {
    run_test(|redis, keys, _ns| async move {
        let mut conn = redis.pool().get().await.unwrap();
        let args = Map::new();

        let first = enqueue_unique(&mut conn, &keys, "digest", args.clone()).await.unwrap();
        assert!(first);

        let second = enqueue_unique(&mut conn, &keys, "digest", args).await.unwrap();
        assert!(
            !second,
            "a second identical unique job must be rejected while the first is pending"
        );
    })
    .await;
}

#[tokio::test]
async fn failed_job_with_remaining_retries_moves_to_retry_set() {
    run_test(|redis, keys, _ns| async move {
        let mut conn = redis.pool().get().await.unwrap();
        let job = JobRecord::new(JobId::Value("job-2"), "flaky", Map::new());
        enqueue(&mut conn, &keys, &job).await.unwrap();

        let sampled = sampled_for(&keys, "flaky", "pool-a");
        let fetched = FetchScript::new().run(&mut conn, &sampled, "pool-a").await.unwrap().unwrap();
        let mut failing_job = JobRecord::from_payload(&fetched.payload).unwrap();
        failing_job.mark_failed("boom");
        let retry_payload = failing_job.to_payload().unwrap();

        let job_type_keys = keys.job_type_keys("flaky", "pool-a");
        FailScript::new()
            .run(
                &mut conn,
                &job_type_keys.inprogress,
                &job_type_keys.lock,
                &job_type_keys.lock_info,
                &keys.retry(),
                &fetched.payload,
                "pool-a",
                &retry_payload,
                failing_job.failed_at + 60,
                FailRoute::Retry,
            )
            .await
            .unwrap();

        let retry_count: i64 = conn.zcard(keys.retry()).await.unwrap();
        assert_eq!(retry_count, 1);
    })
    .await;
}

#[derive(Default)]
struct CountingContext {
    handled: AtomicUsize,
}

/// Drives a full `WorkerPoolBuilder::start()` / `Worker::run()` / `stop()` lifecycle, the one
/// path the scripted-script tests above never exercise. Also doubles as the regression test for
/// the hook chain seeing the same context instance the handler mutated, not a fresh default.
#[tokio::test]
async fn full_pool_processes_a_job_then_stops_without_deadlocking() {
    run_test(|redis, keys, namespace| async move {
        let (hook_tx, mut hook_rx) = tokio::sync::mpsc::unbounded_channel::<usize>();

        let job_type = JobTypeBuilder::new(
            "increment",
            context_handler(|ctx: Arc<CountingContext>, _job: JobRecord| async move {
                ctx.handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .hook(Arc::new(move |ctx: Arc<CountingContext>, _job: JobRecord, _outcome: JobOutcome| {
            let hook_tx = hook_tx.clone();
            Box::pin(async move {
                let _ = hook_tx.send(ctx.handled.load(Ordering::SeqCst));
            }) as workpool_pool::middleware::BoxFuture<'static, ()>
        }))
        .build()
        .unwrap();

        let mut shutdown = PoolShutdown::new();
        let pool = WorkerPoolBuilder::<CountingContext>::new(redis.clone(), PoolConfig::new(namespace, 1))
            .register(job_type)
            .start(&shutdown)
            .await
            .unwrap();

        let mut conn = redis.pool().get().await.unwrap();
        let job = JobRecord::new(JobId::Value("job-lifecycle"), "increment", Map::new());
        enqueue(&mut conn, &keys, &job).await.unwrap();

        let seen_by_hook = tokio::time::timeout(std::time::Duration::from_secs(5), hook_rx.recv())
            .await
            .expect("hook should fire within 5s once the worker picks up the job")
            .expect("hook channel should not close before sending");
        assert_eq!(
            seen_by_hook, 1,
            "hook must observe the same ctx instance the handler incremented, not a fresh default"
        );

        tokio::time::timeout(std::time::Duration::from_secs(5), pool.stop(&mut shutdown))
            .await
            .expect("stop() must return instead of deadlocking on the shared shutdown signal")
            .unwrap();
    })
    .await;
}
