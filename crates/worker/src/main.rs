use std::sync::Arc;

use shared::config::{WorkerConfig, load_dotenv};
use shared::repos::Store;
use tokio::signal;
use tracing::{error, info};
use webhook_worker::{HttpWebhookProcessor, RetryScheduler, SchedulerSettings};

#[tokio::main]
async fn main() {
    if let Err(err) = load_dotenv() {
        eprintln!("{err}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "webhook_worker=debug,shared=info".to_string()),
        )
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read worker config: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(&config.database_url, config.database_max_connections).await
    {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to postgres: {err}");
            std::process::exit(1);
        }
    };

    if config.run_migrations {
        if let Err(err) = store.run_migrations(&config.migrations_dir).await {
            error!("failed to run migrations: {err}");
            std::process::exit(1);
        }
    }

    let processor = match HttpWebhookProcessor::new(
        config.payment_service_url.clone(),
        config.payment_service_auth_token.clone(),
        config.processor_timeout(),
    ) {
        Ok(processor) => processor,
        Err(err) => {
            error!("failed to build payment service client: {err}");
            std::process::exit(1);
        }
    };

    info!(
        tick_seconds = config.tick_seconds,
        max_retries = config.max_retries,
        backoff_steps = config.retry_policy.delays().len(),
        payment_service_url = %config.payment_service_url,
        "webhook worker starting"
    );

    let scheduler = RetryScheduler::new(
        Arc::new(store),
        Arc::new(processor),
        SchedulerSettings::from_config(&config),
    );
    let handle = scheduler.spawn();

    if let Err(err) = signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
    }
    info!("shutdown signal received");

    handle.shutdown().await;
    info!("webhook worker stopped");
}
