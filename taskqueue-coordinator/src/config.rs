use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoordinatorError, CoordinatorResult};

fn default_address() -> String {
    "0.0.0.0:7878".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("taskqueue.sqlite3")
}

fn default_monitor_tick_ms() -> u64 {
    1_000
}

fn default_worker_dead_after_ms() -> u64 {
    60_000
}

fn default_lease_duration_ms() -> u64 {
    120_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Raw CLI/env layer. Every field is optional here so that an unset field
/// can fall through to the config file, and only then to the built-in
/// default — a flag with `default_value` would otherwise always win over
/// the file, since clap fills it in whether or not the user passed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Parser)]
#[command(name = "coordinatord", about = "Task-queue coordinator", long_about = None)]
#[serde(default)]
struct CliArgs {
    #[arg(long, env = "TASKQUEUE_ADDRESS")]
    address: Option<String>,

    #[arg(long, env = "TASKQUEUE_STORE_PATH")]
    store_path: Option<PathBuf>,

    #[arg(long, env = "TASKQUEUE_MONITOR_TICK_MS")]
    monitor_tick_ms: Option<u64>,

    #[arg(long, env = "TASKQUEUE_WORKER_DEAD_AFTER_MS")]
    worker_dead_after_ms: Option<u64>,

    #[arg(long, env = "TASKQUEUE_DEFAULT_LEASE_DURATION_MS")]
    default_lease_duration_ms: Option<u64>,

    #[arg(long, env = "TASKQUEUE_CONFIG_PATH")]
    #[serde(skip)]
    config_path: Option<PathBuf>,

    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

impl CliArgs {
    /// Fills in any field left `None` by the CLI/env layer from a JSON
    /// config file, mirroring the teacher lineage's `merge_from_file`:
    /// file values only apply where the higher-precedence layer is silent.
    fn merge_from_file(&mut self, path: &PathBuf) -> CoordinatorResult<()> {
        let file = std::fs::File::open(path)
            .map_err(|e| CoordinatorError::Config(format!("opening {path:?}: {e}")))?;
        let reader = std::io::BufReader::new(file);
        let mut file_config: Value = serde_json::from_reader(reader)
            .map_err(|e| CoordinatorError::Config(format!("parsing {path:?}: {e}")))?;
        let cli_config =
            serde_json::to_value(&*self).map_err(|e| CoordinatorError::Config(e.to_string()))?;
        merge(&mut file_config, &cli_config);
        *self = serde_json::from_value(file_config)
            .map_err(|e| CoordinatorError::Config(e.to_string()))?;
        Ok(())
    }
}

/// Merges two JSON values together, with `b`'s non-null fields winning.
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

/// Fully-resolved coordinator configuration: CLI flags, then environment
/// variables (`TASKQUEUE_*`, `RUST_LOG`), then an optional JSON config
/// file, then these defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub address: String,
    pub store_path: PathBuf,
    pub monitor_tick_ms: u64,
    pub worker_dead_after_ms: u64,
    pub default_lease_duration_ms: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: default_address(),
            store_path: default_store_path(),
            monitor_tick_ms: default_monitor_tick_ms(),
            worker_dead_after_ms: default_worker_dead_after_ms(),
            default_lease_duration_ms: default_lease_duration_ms(),
            log_level: default_log_level(),
        }
    }
}

impl From<CliArgs> for Config {
    fn from(args: CliArgs) -> Self {
        Config {
            address: args.address.unwrap_or_else(default_address),
            store_path: args.store_path.unwrap_or_else(default_store_path),
            monitor_tick_ms: args.monitor_tick_ms.unwrap_or_else(default_monitor_tick_ms),
            worker_dead_after_ms: args
                .worker_dead_after_ms
                .unwrap_or_else(default_worker_dead_after_ms),
            default_lease_duration_ms: args
                .default_lease_duration_ms
                .unwrap_or_else(default_lease_duration_ms),
            log_level: args.log_level.unwrap_or_else(default_log_level),
        }
    }
}

impl Config {
    /// Parses CLI args/env, merges in a config file if one was named, and
    /// fills in defaults for anything still unset.
    pub fn load() -> CoordinatorResult<Self> {
        let mut args = CliArgs::parse();
        if let Some(path) = args.config_path.clone() {
            args.merge_from_file(&path)?;
        }
        Ok(args.into())
    }
}
