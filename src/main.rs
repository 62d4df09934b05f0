use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use context_handoff::{
    config::Config,
    api::routes::create_router,
    dispatch::Dispatcher,
    llm::HttpProvider,
    store::Store,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::load()?;
    let server_addr = config.server_addr;

    let store = Store::open(&config.store_path).await?;
    info!(path = %config.store_path.display(), "store opened");
    let provider = HttpProvider::new(config.providers.clone())?;

    let app_state = AppState {
        dispatcher: Arc::new(Dispatcher::new(Arc::new(store), provider)),
        config: Arc::new(config),
    };

    let app = create_router(app_state);
    let listener = TcpListener::bind(server_addr).await?;

    info!(%server_addr, "background service listening");
    axum::serve(listener, app).await?;

    Ok(())
}
