//! A distributed, priority-aware background job engine backed by a Redis-compatible store.
//! See the crate's design document for the full component breakdown; this module just wires
//! the pieces together and re-exports the public surface.

pub mod enqueue;
pub mod error;
pub mod heartbeat;
pub mod job;
pub mod job_type;
pub mod keys;
pub mod middleware;
pub mod observer;
pub mod periodic;
pub mod pool;
pub mod reaper;
pub mod requeuer;
pub mod sampler;
pub mod scripts;
pub mod status;
pub mod worker;

pub use enqueue::{enqueue, enqueue_scheduled, enqueue_unique, unique_hash};
pub use error::{Error, Result};
pub use job::{JobId, JobRecord};
pub use job_type::{JobType, JobTypeBuilder};
pub use keys::Keys;
pub use middleware::{
    compose, context_handler, generic_handler, ComposedHandler, ContextMiddlewareFn,
    GenericMiddlewareFn, HandlerError, HandlerResult, Hook, JobOutcome, Middleware,
};
pub use pool::{PoolConfig, WorkerPool, WorkerPoolBuilder};
pub use status::{find_dead_job, job_type_status, pool_status, set_paused, JobTypeStatus, PoolStatus};
pub use worker::WorkerSignal;
