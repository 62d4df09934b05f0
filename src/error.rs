use axum::{
    response::{IntoResponse, Response},
    Json,
    http::StatusCode,
};

use crate::api::response::Reply;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("No API key configured. Open the extension settings and add your API key.")]
    MissingApiKey,

    #[error("{0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The provider answered but the handoff could not be persisted.
    #[error("Summary generated but storage failed: {0}")]
    SummaryNotStored(String),

    #[error("No conversation found to save")]
    NothingToCapture,

    #[error("No saved context found")]
    NothingSaved,

    #[error("This page is not a supported chat platform")]
    UnsupportedPage,

    /// Failure reported by the background service, shown as-is.
    #[error("{0}")]
    Remote(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not reach background service: {0}")]
    Transport(String),

    #[error("Clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// No-op conditions are reported to the user but are not exceptional.
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            AppError::NothingToCapture | AppError::NothingSaved | AppError::UnsupportedPage
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::UnknownAction(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_) | AppError::Storage(_) | AppError::SummaryNotStored(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::OK,
        };

        (status, Json(Reply::failure(self.to_string()))).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        // The URL can carry the API key.
        AppError::Provider(err.without_url().to_string())
    }
}

impl From<std::env::VarError> for AppError {
    fn from(err: std::env::VarError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
