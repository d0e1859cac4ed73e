//! Bank Ledger service
//!
//! Loads `config/<env>.yaml`, wires the ledger service, starts the scheduler
//! and runs until Ctrl-C, then drains the worker pool.

use bank_ledger::config::AppConfig;
use bank_ledger::logging::init_logging;
use bank_ledger::service::LedgerService;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        "Starting bank ledger in {} mode",
        env
    );

    let service = LedgerService::from_config(&app_config).await?;
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    service.shutdown().await;
    Ok(())
}
