use std::sync::Arc;
use std::time::Duration;

use taskqueue_coordinator::monitor::{self, MonitorConfig};
use taskqueue_coordinator::{server, Config, Engine};
use taskqueue_store::{SqliteStore, Store};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    debug!(?config, "starting coordinator");

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_or_create(&config.store_path)?);
    let engine = Arc::new(Engine::new(store.clone(), Duration::from_millis(config.default_lease_duration_ms)));

    let monitor_handle = tokio::spawn(monitor::run(
        store,
        MonitorConfig {
            tick: Duration::from_millis(config.monitor_tick_ms),
            worker_dead_after: Duration::from_millis(config.worker_dead_after_ms),
        },
    ));

    info!("coordinator ready");
    let result = server::serve(&config.address, engine).await;
    monitor_handle.abort();
    result
}
