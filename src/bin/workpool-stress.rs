//! Throughput smoke test: spins up a disposable namespace, registers a trivial job type, floods
//! it with jobs from several producers, and reports how long a pool of workers takes to drain
//! them. Grounded in the teacher's `src/bin/erq-stress.rs`.

use std::{sync::Arc, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Map;
use structopt::StructOpt;
use workpool::{service_config::Config, tracing_config};
use workpool_pool::{
    enqueue, generic_handler, JobId, JobRecord, JobTypeBuilder, Keys, PoolConfig, WorkerPoolBuilder,
};
use workpool_shutdown::PoolShutdown;

#[derive(Debug, StructOpt)]
#[structopt(name = "workpool-stress", about = "Flood a disposable pool with jobs and time the drain")]
struct Args {
    #[structopt(short, long, default_value = "4")]
    producers: usize,
    #[structopt(short, long, default_value = "4")]
    consumers: usize,
    #[structopt(short, long, default_value = "10000")]
    num_jobs: usize,
}

#[tokio::main]
async fn main() -> Result<(), workpool::Error> {
    tracing_config::configure("workpool-stress");
    let mut config = Config::from_env()?;
    config.namespace = format!("stress-{}", uuid::Uuid::new_v4());
    let redis = config.redis_pool()?;
    let keys = Keys::new(config.namespace.clone());
    let args = Args::from_args();

    let processed = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let handler_counter = processed.clone();

    let job_type = JobTypeBuilder::new(
        "noop",
        generic_handler(move |_job| {
            let counter = handler_counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(())
            }
        }),
    )
    .build()?;

    let mut shutdown = PoolShutdown::new();
    let pool = WorkerPoolBuilder::<()>::new(redis.clone(), PoolConfig::new(config.namespace.clone(), args.consumers))
        .register(job_type)
        .start(&shutdown)
        .await?;

    let started = std::time::Instant::now();

    let producers: Vec<_> = (0..args.producers)
        .map(|i| {
            let redis = redis.clone();
            let keys = keys.clone();
            let jobs_per_producer = args.num_jobs / args.producers;
            tokio::spawn(async move {
                let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;
                for j in 0..jobs_per_producer {
                    let job = JobRecord::new(
                        JobId::Value(&format!("stress-{}-{}", i, j)),
                        "noop",
                        Map::new(),
                    );
                    enqueue(&mut conn, &keys, &job).await?;
                }
                Ok::<(), workpool_pool::Error>(())
            })
        })
        .collect();

    for p in producers {
        p.await??;
    }

    let target = args.num_jobs as u64;
    let bar = ProgressBar::new(target);
    bar.set_style(
        ProgressStyle::default_bar().template("{bar:40} {pos}/{len} jobs processed ({per_sec})"),
    );
    loop {
        let done = processed.load(std::sync::atomic::Ordering::Relaxed);
        bar.set_position(done);
        if done >= target {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bar.finish_at_current_pos();

    println!(
        "processed {} jobs in {:?} ({} namespace)",
        target,
        started.elapsed(),
        config.namespace
    );

    pool.stop(&mut shutdown).await?;
    Ok(())
}
