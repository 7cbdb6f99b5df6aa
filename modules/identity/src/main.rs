use anyhow::Context;
use event_bus::connect_bus;
use event_consumer::ConsumerRegistry;
use identity_rs::{register_consumers, ActivityStore, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    let bus = connect_bus(&config.bus).context("failed to create event bus")?;

    let store = ActivityStore::new();
    let mut registry = ConsumerRegistry::new(bus, config.consumer.clone());
    register_consumers(&mut registry, &store, &config.topics);

    let host = registry.start();
    host.ready().await;
    tracing::info!(consumers = host.statuses().len(), "Identity worker started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");

    let mut failed = 0;
    for result in host.shutdown().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Consumer ended with an error");
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} consumer(s) failed");
    }

    tracing::info!(activities = store.len().await, "Identity worker stopped");
    Ok(())
}
