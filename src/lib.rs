pub mod analysis;
pub mod commands;
pub mod models;

use commands::scheduler::{AggregationScheduler, SchedulerConfig};
use commands::settings::load_effective_settings;
use tokio::sync::watch;

const DATA_DIR_ENV: &str = "COMMUNITYLENS_DATA_DIR";

fn resolve_data_dir() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(DATA_DIR_ENV).ok())
        .unwrap_or_else(|| ".".to_string())
}

/// Boots logging and runs the aggregation scheduler until Ctrl-C.
pub fn run() -> Result<(), String> {
    let data_dir = resolve_data_dir();
    let settings = load_effective_settings(&data_dir)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log_level.as_str()))
        .init();
    log::info!("using data directory {data_dir}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Runtime error: {e}"))?;

    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    // Keep the sender alive; dropping it would stop the scheduler.
                    log::warn!("cannot listen for Ctrl-C, running until killed: {e}");
                    std::future::pending::<()>().await;
                }
            }
        });

        let scheduler = AggregationScheduler::new(data_dir, SchedulerConfig::from(&settings));
        scheduler.run(shutdown_rx).await;
    });

    Ok(())
}
