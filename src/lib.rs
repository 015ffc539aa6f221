//! Operational shell around the `workpool-pool` crate: process configuration, logging setup,
//! and the CLI binaries. The job engine itself lives entirely in `workpool-pool`; this crate
//! just wires it up the way a deployed service would.

pub mod error;
pub mod service_config;
pub mod tracing_config;

pub use error::{Error, Result};
pub use service_config::Config;

pub use workpool_pool::*;
