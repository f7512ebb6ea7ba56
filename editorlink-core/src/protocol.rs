//! Wire messages exchanged with automation clients and the editor plugin

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoalesceError, Outcome};

/// Request from an automation client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRequest {
    /// Caller-assigned id, generated by the bridge when absent
    #[serde(default)]
    pub request_id: Option<String>,

    pub action: String,

    #[serde(default = "empty_object")]
    pub payload: serde_json::Value,

    /// Overrides the configured client wait
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Response delivered to an automation client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AutomationResponse {
    pub const KIND: &'static str = "automation_response";

    pub fn from_outcome(request_id: &str, outcome: &Outcome) -> Self {
        match outcome {
            Ok(result) => Self {
                kind: Self::KIND.to_string(),
                request_id: request_id.to_string(),
                success: true,
                message: None,
                result: Some(result.clone()),
                error: None,
            },
            Err(e) => Self::failure(request_id, e.code(), e.to_string()),
        }
    }

    pub fn failure(request_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            request_id: request_id.to_string(),
            success: false,
            message: Some(message.into()),
            result: None,
            error: Some(code.to_string()),
        }
    }
}

/// Request queued for the editor plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    pub id: Uuid,
    pub action: String,
    pub payload: serde_json::Value,
}

/// Response posted back by the editor plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    pub id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginResponse {
    /// Fold the plugin's reply into the outcome every waiter receives
    pub fn into_outcome(self) -> Outcome {
        if self.success {
            return Ok(self.result.unwrap_or(serde_json::Value::Null));
        }
        let detail = match (self.error, self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code,
            (None, Some(message)) => message,
            (None, None) => "editor reported failure".to_string(),
        };
        Err(CoalesceError::operation_failed(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let req: AutomationRequest =
            serde_json::from_value(json!({"action": "list_assets"})).unwrap();
        assert!(req.request_id.is_none());
        assert_eq!(req.payload, json!({}));
        assert!(req.timeout_ms.is_none());
    }

    #[test]
    fn test_response_shape() {
        let ok = AutomationResponse::from_outcome("req-1", &Ok(json!({"path": "/Game/Foo/Bar"})));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["type"], "automation_response");
        assert_eq!(value["requestId"], "req-1");
        assert_eq!(value["success"], true);
        assert_eq!(value["result"]["path"], "/Game/Foo/Bar");
        assert!(value.get("error").is_none());

        let failed = AutomationResponse::from_outcome(
            "req-2",
            &Err(CoalesceError::operation_failed("locked")),
        );
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("OPERATION_FAILED"));
        assert_eq!(failed.message.as_deref(), Some("Operation failed: locked"));
    }

    #[test]
    fn test_plugin_failure_becomes_operation_failed() {
        let resp = PluginResponse {
            id: Uuid::new_v4(),
            success: false,
            message: Some("Parent class not found".to_string()),
            result: None,
            error: Some("INVALID_PARENT".to_string()),
        };
        assert_eq!(
            resp.into_outcome(),
            Err(CoalesceError::operation_failed("INVALID_PARENT: Parent class not found"))
        );
    }

    #[test]
    fn test_plugin_success_without_result() {
        let resp: PluginResponse =
            serde_json::from_value(json!({"id": Uuid::nil(), "success": true})).unwrap();
        assert_eq!(resp.into_outcome(), Ok(serde_json::Value::Null));
    }
}
