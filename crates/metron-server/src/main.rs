use std::path::Path;

use anyhow::{Context, Result};
use metron_common::crypt::{self, DEFAULT_KEY_BITS};
use metron_common::PayloadDecoder;
use metron_server::app;
use metron_server::config::ServerConfig;
use metron_server::state::AppState;
use metron_storage::open_store;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  metron-server [config.toml]      Start the server");
    eprintln!("  metron-server keygen <dir>       Write private.pem and public.pem into <dir>");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("metron=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("keygen") => {
            let dir = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("keygen requires a <dir> argument")
            })?;
            run_keygen(Path::new(dir))
        }
        Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        path => run_server(path).await,
    }
}

fn run_keygen(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let pair = crypt::generate_keypair(DEFAULT_KEY_BITS)?;
    let private_path = dir.join("private.pem");
    let public_path = dir.join("public.pem");
    std::fs::write(&private_path, pair.private_pem)
        .with_context(|| format!("Failed to write {}", private_path.display()))?;
    std::fs::write(&public_path, pair.public_pem)
        .with_context(|| format!("Failed to write {}", public_path.display()))?;
    tracing::info!(
        private = %private_path.display(),
        public = %public_path.display(),
        bits = DEFAULT_KEY_BITS,
        "Key pair written"
    );
    Ok(())
}

async fn run_server(config_path: Option<&str>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;

    let store_config = config.store_config();
    tracing::info!(
        address = %config.address,
        backend = store_config.backend_name(),
        signing = config.sign_key_bytes().is_some(),
        decryption = config.crypto_key.is_some(),
        "metron-server starting"
    );

    let store = open_store(store_config)
        .await
        .context("Failed to open metric store")?;

    let private_key = match &config.crypto_key {
        Some(path) => Some(
            crypt::read_private_key(path)
                .with_context(|| format!("Failed to load private key {}", path.display()))?,
        ),
        None => None,
    };
    let decoder = PayloadDecoder::new(config.sign_key_bytes(), private_key);

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    tracing::info!(address = %config.address, "HTTP server listening");

    let state = AppState::new(store.clone(), decoder, config);
    let http_app = app::build_http_app(state);

    axum::serve(listener, http_app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    store.close().await?;
    tracing::info!("Store closed");
    Ok(())
}
