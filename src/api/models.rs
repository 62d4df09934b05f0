use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::store::Settings;

/// A captured transcript on its way to summarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub conversation_text: String,
    pub platform_name: String,
    pub source_url: String,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

/// Requests the in-page agent (or the settings UI) sends the background
/// service, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    Summarize(CaptureRequest),
    GetLastSave,
    GetAllSaves,
    HasSavedState,
    DeleteSave { id: String },
    GetSettings,
    SaveSettings { settings: Settings },
}

impl Request {
    pub const ACTIONS: [&'static str; 7] = [
        "summarize",
        "getLastSave",
        "getAllSaves",
        "hasSavedState",
        "deleteSave",
        "getSettings",
        "saveSettings",
    ];

    pub fn action(&self) -> &'static str {
        match self {
            Request::Summarize(_) => "summarize",
            Request::GetLastSave => "getLastSave",
            Request::GetAllSaves => "getAllSaves",
            Request::HasSavedState => "hasSavedState",
            Request::DeleteSave { .. } => "deleteSave",
            Request::GetSettings => "getSettings",
            Request::SaveSettings { .. } => "saveSettings",
        }
    }

    /// Parses a raw message, telling an unknown action apart from a known
    /// action with bad fields.
    pub fn from_value(value: Value) -> Result<Self> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !Self::ACTIONS.contains(&action.as_str()) {
            return Err(AppError::UnknownAction(action));
        }
        Ok(serde_json::from_value(value)?)
    }
}
