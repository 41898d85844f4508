//! # Task Queue — coordinator
//!
//! Wires a [`taskqueue_store::Store`] to an HTTP front end and a
//! background monitor loop. [`engine::Engine`] is the operation layer
//! (§4.1-4.5); [`monitor`] is the dead-worker sweep / lease reclaim
//! ticker (§4.6); [`server`] is the axum binding (§4.10).

pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod server;

pub use config::Config;
pub use engine::Engine;
pub use error::{CoordinatorError, CoordinatorResult};
