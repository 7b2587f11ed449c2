use std::sync::Arc;

use mcp_edge_server::{
    build_app, config::Config, domain::CapabilityRegistry, logging, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;
    let registry = Arc::new(CapabilityRegistry::builtin());
    let state = AppState::new(&config, registry);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        transport = %config.transport,
        server_name = %config.server_name,
        auth = config.api_token.is_some(),
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
