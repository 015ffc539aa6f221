mod error;
mod redis;

pub use error::{Error, Result};
pub use redis::RedisPool;
