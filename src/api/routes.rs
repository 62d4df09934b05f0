use axum::{
    routing::{get, post},
    Router,
    body::Bytes,
    extract::{Json, State},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use tower_http::cors::{CorsLayer, Any};
use tracing::{info, warn};

use crate::error::AppError;
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/message", post(message_handler))
        .route("/api/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn message_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let start_time = std::time::Instant::now();

    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            warn!(error = %err, "message body is not JSON");
            return AppError::from(err).into_response();
        }
    };

    let action = body
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("<none>")
        .to_string();
    let reply = state.dispatcher.handle_value(body).await;

    info!(action = %action, success = reply.success, elapsed = ?start_time.elapsed(), "handled message");
    Json(reply).into_response()
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let saves = state.dispatcher.store().saves().await.len();
    Json(json!({
        "status": "ok",
        "saves": saves,
        "store": state.config.store_path.display().to_string(),
    }))
}
