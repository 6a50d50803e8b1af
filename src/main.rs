mod config;
mod engine;
mod journal;
mod metrics;
mod upstream;
mod web;
mod window;

use std::sync::Arc;
use tracing::info;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::engine::NumberEngine;
use crate::web::server::WebServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "number_window=info,tower_http=info".into()),
        )
        .init();

    info!("🔢 number-window v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load config
    let explicit_path = std::env::args().nth(1);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = Config::load(&config_path, explicit_path.is_some())?;
    info!("Config loaded ({})", config_path);

    let engine = Arc::new(NumberEngine::new(Arc::new(config))?);

    WebServer::new(engine).run().await?;
    info!("🔢 number-window stopped");
    Ok(())
}
