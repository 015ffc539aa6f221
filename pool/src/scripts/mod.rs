pub mod complete;
pub mod fail;
pub mod fetch;
pub mod reap;
pub mod requeue;
