//! Entry point for the `appmgr-gateway` HTTP server.

use std::sync::Arc;

use appmgr_gateway::{listener, AppContext, GatewayConfig};
use appmgr_registry::LocalRegistry;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match GatewayConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(LocalRegistry::new(config.public_json()));
    let ctx = match AppContext::new(&config, registry) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            tracing::error!(error = %e, "failed to build route table");
            std::process::exit(1);
        }
    };

    if let Err(e) = listener::serve(&config, ctx).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
