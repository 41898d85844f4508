//! # Task Queue — worker
//!
//! The worker-side half of the system: the main claim/execute/submit loop
//! (§4.7), the heartbeat and submission-cache tickers (§4.8, §5), the
//! static executor registry (§4.9), and the two built-in task functions.

pub mod cache;
pub mod config;
pub mod error;
pub mod main_loop;
pub mod registry;
pub mod tasks;

pub use config::Config;
pub use error::{WorkerError, WorkerResult};
pub use registry::{default_registry, ExecutionContext, Registry, TaskFn};
