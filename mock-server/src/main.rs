use std::sync::Arc;

use mock_server::{MockState, DEFAULT_MAX_ITEMS_PER_CALL};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let max_items = std::env::var("MOCK_MAX_ITEMS_PER_CALL")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_MAX_ITEMS_PER_CALL);

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, max_items, "mock items API listening");
    mock_server::run_with_state(listener, Arc::new(MockState::new(max_items))).await
}
