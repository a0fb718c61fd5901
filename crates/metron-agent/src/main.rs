use anyhow::Result;
use metron_agent::{Agent, AgentConfig};
use metron_storage::{open_store, StoreConfig};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metron=info".parse()?))
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => AgentConfig::load(&path)?,
        None => AgentConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;

    tracing::info!(
        server = %config.server_address,
        signing = config.sign_key_bytes().is_some(),
        encryption = config.crypto_key.is_some(),
        "metron-agent starting"
    );

    let store = open_store(StoreConfig::Memory).await?;
    let agent = Agent::from_config(&config, store.clone(), metron_collector::default_collectors())?;
    agent.start()?;

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    agent.shutdown().await;
    store.close().await?;
    Ok(())
}
