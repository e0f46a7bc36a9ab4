use homewizard_grid_bridge::{Config, FileHistory, LocalAccessoryStore, PollScheduler};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting HomeWizard grid bridge");
    let config_path = env::var("HOMEWIZARD_CONFIG").unwrap_or_else(|_| "config.json".into());
    let config = Config::load(&config_path)?;
    let scheduler_config = match config.scheduler_config() {
        Ok(scheduler_config) => scheduler_config,
        Err(e) => {
            error!(error = %e, "invalid configuration, not starting");
            return Err(e.into());
        }
    };

    let storage = config.storage_path();
    let host = Arc::new(LocalAccessoryStore::open(&storage)?);
    let history = Arc::new(FileHistory::new(storage.clone()));

    let scheduler = PollScheduler::new(scheduler_config, host, history)?.spawn();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.stop().await;

    Ok(())
}
