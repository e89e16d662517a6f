use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

mod api;
mod config;
mod features;
mod model;
mod predict;

use api::AppState;
use config::{Config, LoadPolicy};
use model::ModelStore;
use predict::Predictor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!(
        "Model directory: {} (policy={}, schema={:?})",
        config.model_dir.display(),
        config.load_policy.as_str(),
        config.schema
    );

    let store = Arc::new(ModelStore::new(
        config.model_dir.clone(),
        config.load_policy,
        config.schema,
    ));

    // Eager loading never aborts startup: a failure leaves /health degraded.
    if config.load_policy == LoadPolicy::Eager {
        match store.load().await {
            Ok(models) => {
                if let Err(e) = models.encoder() {
                    error!("Feature schema unavailable, predictions will fail: {}", e);
                }
            }
            Err(e) => warn!("Starting in degraded mode: {}", e),
        }
    }

    let app = api::router(AppState {
        predictor: Predictor::new(store, config.round_digits),
    });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Prediction API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
