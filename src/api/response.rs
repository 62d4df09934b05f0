use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// The single reply every request gets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_saved: Option<bool>,
}

impl Reply {
    pub fn success<T: Serialize>(data: T) -> Result<Self> {
        Ok(Self {
            success: true,
            data: Some(serde_json::to_value(data)?),
            ..Self::default()
        })
    }

    pub fn done() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn has_saved(has_saved: bool) -> Self {
        Self {
            success: true,
            has_saved: Some(has_saved),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Decodes `data` of a successful reply, or surfaces the failure text.
    pub fn into_data<T: serde::de::DeserializeOwned>(self) -> std::result::Result<T, String> {
        if !self.success {
            return Err(self.error.unwrap_or_else(|| "Unknown error".to_string()));
        }
        let data = self.data.unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| e.to_string())
    }
}

impl From<AppError> for Reply {
    fn from(err: AppError) -> Self {
        Reply::failure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_shape() {
        let reply = Reply::failure("No saved context found");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({ "success": false, "error": "No saved context found" })
        );
    }

    #[test]
    fn has_saved_shape() {
        let reply = Reply::has_saved(false);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({ "success": true, "hasSaved": false })
        );
    }

    #[test]
    fn into_data_surfaces_errors() {
        let ok = Reply::success(vec![1, 2]).unwrap();
        assert_eq!(ok.into_data::<Vec<i32>>().unwrap(), vec![1, 2]);
        let err = Reply::failure("boom").into_data::<Vec<i32>>().unwrap_err();
        assert_eq!(err, "boom");
    }
}
