pub mod adapter;
pub mod api;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inject;
pub mod llm;
pub mod orchestrator;
pub mod page;
pub mod sanitize;
pub mod store;
pub mod surface;
pub mod transcript;

use std::sync::Arc;
use config::Config;
use dispatch::Dispatcher;
use llm::HttpProvider;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher<HttpProvider>>,
}
