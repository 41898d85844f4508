use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WorkerError, WorkerResult};

fn default_coordinator_url() -> String {
    "http://127.0.0.1:7878".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_cache_ttl_ms() -> u64 {
    3_600_000
}

fn default_cache_retry_interval_ms() -> u64 {
    20_000
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("taskqueue-worker-cache.ndjson")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Raw CLI/env layer, mirroring the coordinator's `CliArgs` split (see
/// its config module for why every field is `Option`): a flag with
/// `default_value` would always beat the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Parser)]
#[command(name = "taskqueue-worker", about = "Task-queue worker", long_about = None)]
#[serde(default)]
struct CliArgs {
    #[arg(long, env = "TASKQUEUE_WORKER_ID")]
    worker_id: Option<String>,

    #[arg(long, env = "TASKQUEUE_COORDINATOR_URL")]
    coordinator_url: Option<String>,

    #[arg(long, env = "TASKQUEUE_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    #[arg(long, env = "TASKQUEUE_HEARTBEAT_INTERVAL_MS")]
    heartbeat_interval_ms: Option<u64>,

    #[arg(long, env = "TASKQUEUE_CACHE_TTL_MS")]
    cache_ttl_ms: Option<u64>,

    #[arg(long, env = "TASKQUEUE_CACHE_RETRY_INTERVAL_MS")]
    cache_retry_interval_ms: Option<u64>,

    #[arg(long, env = "TASKQUEUE_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    #[arg(long, env = "TASKQUEUE_CONFIG_PATH")]
    #[serde(skip)]
    config_path: Option<PathBuf>,

    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

impl CliArgs {
    fn merge_from_file(&mut self, path: &PathBuf) -> WorkerResult<()> {
        let file = std::fs::File::open(path)
            .map_err(|e| WorkerError::Config(format!("opening {path:?}: {e}")))?;
        let reader = std::io::BufReader::new(file);
        let mut file_config: Value = serde_json::from_reader(reader)
            .map_err(|e| WorkerError::Config(format!("parsing {path:?}: {e}")))?;
        let cli_config =
            serde_json::to_value(&*self).map_err(|e| WorkerError::Config(e.to_string()))?;
        merge(&mut file_config, &cli_config);
        *self = serde_json::from_value(file_config).map_err(|e| WorkerError::Config(e.to_string()))?;
        Ok(())
    }
}

fn merge(a: &mut Value, b: &Value) {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in b {
                merge(a.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (a, b) if !b.is_null() => *a = b.clone(),
        _ => {}
    }
}

/// Fully-resolved worker configuration. `worker_id` has no compile-time
/// default: when unset it is generated at startup (OQ-2), not here, since
/// a `Config::default()` should be pure and reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub worker_id: Option<String>,
    pub coordinator_url: String,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_retry_interval_ms: u64,
    pub cache_path: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_id: None,
            coordinator_url: default_coordinator_url(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_retry_interval_ms: default_cache_retry_interval_ms(),
            cache_path: default_cache_path(),
            log_level: default_log_level(),
        }
    }
}

impl From<CliArgs> for Config {
    fn from(args: CliArgs) -> Self {
        Config {
            worker_id: args.worker_id,
            coordinator_url: args.coordinator_url.unwrap_or_else(default_coordinator_url),
            poll_interval_ms: args.poll_interval_ms.unwrap_or_else(default_poll_interval_ms),
            heartbeat_interval_ms: args
                .heartbeat_interval_ms
                .unwrap_or_else(default_heartbeat_interval_ms),
            cache_ttl_ms: args.cache_ttl_ms.unwrap_or_else(default_cache_ttl_ms),
            cache_retry_interval_ms: args
                .cache_retry_interval_ms
                .unwrap_or_else(default_cache_retry_interval_ms),
            cache_path: args.cache_path.unwrap_or_else(default_cache_path),
            log_level: args.log_level.unwrap_or_else(default_log_level),
        }
    }
}

impl Config {
    pub fn load() -> WorkerResult<Self> {
        let mut args = CliArgs::parse();
        if let Some(path) = args.config_path.clone() {
            args.merge_from_file(&path)?;
        }
        Ok(args.into())
    }
}
