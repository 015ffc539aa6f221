//! Operator CLI for inspecting and nudging a running worker pool, grounded in the teacher's
//! `src/bin/erq.rs`.

use redis::AsyncCommands;
use serde_json::Map;
use structopt::StructOpt;
use workpool::{service_config::Config, tracing_config};
use workpool_pool::{
    enqueue, enqueue_scheduled, enqueue_unique, find_dead_job, job_type_status, pool_status,
    set_paused, JobId, JobRecord, Keys,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "workpoolctl", about = "Inspect and control a workpool deployment")]
struct Args {
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    /// Enqueue a job for immediate execution.
    Enqueue {
        job_type: String,
        /// JSON object of arguments, e.g. '{"user_id": 7}'
        #[structopt(default_value = "{}")]
        args: String,
        #[structopt(long)]
        unique: bool,
        #[structopt(long, help = "Epoch seconds to run at instead of immediately")]
        at: Option<i64>,
    },
    /// Show queue depth and lock state for one job type, or the whole pool if omitted.
    Show {
        job_type: Option<String>,
    },
    /// Pause a job type: workers stop fetching new jobs of this type.
    Pause {
        job_type: String,
    },
    /// Resume a paused job type.
    Unpause {
        job_type: String,
    },
    /// Look up one job by id in the dead set.
    ShowDead {
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), workpool::Error> {
    tracing_config::configure("workpoolctl");
    let config = Config::from_env()?;
    let redis = config.redis_pool()?;
    let keys = Keys::new(config.namespace.clone());

    let args = Args::from_args();
    match args.cmd {
        Cmd::Enqueue {
            job_type,
            args,
            unique,
            at,
        } => {
            let parsed: Map<String, serde_json::Value> = serde_json::from_str(&args)?;
            let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;

            if unique {
                let enqueued = enqueue_unique(&mut conn, &keys, job_type, parsed).await?;
                println!("{}", if enqueued { "enqueued" } else { "already pending (unique)" });
            } else if let Some(run_at) = at {
                let job = JobRecord::scheduled(JobId::Auto, job_type, parsed, run_at);
                enqueue_scheduled(&mut conn, &keys, &job).await?;
                println!("scheduled {} at {}", job.id, run_at);
            } else {
                let job = JobRecord::new(JobId::Auto, job_type, parsed);
                enqueue(&mut conn, &keys, &job).await?;
                println!("enqueued {}", job.id);
            }
        }
        Cmd::Show { job_type } => match job_type {
            Some(name) => {
                let status = job_type_status(&redis, &keys, &name).await?;
                println!("{:#?}", status);
            }
            None => {
                let mut conn = redis.pool().get().await.map_err(workpool_database::Error::from)?;
                let known: Vec<String> = conn
                    .smembers(keys.known_jobs())
                    .await
                    .map_err(workpool_pool::Error::from)?;
                let status = pool_status(&redis, &keys, &known).await?;
                println!("{:#?}", status);
            }
        },
        Cmd::Pause { job_type } => {
            set_paused(&redis, &keys, &job_type, true).await?;
            println!("paused {}", job_type);
        }
        Cmd::Unpause { job_type } => {
            set_paused(&redis, &keys, &job_type, false).await?;
            println!("unpaused {}", job_type);
        }
        Cmd::ShowDead { job_id } => match find_dead_job(&redis, &keys, &job_id).await? {
            Some(job) => println!("{:#?}", job),
            None => println!("no dead job with id {}", job_id),
        },
    }

    Ok(())
}
