//! Server response parsing
//!
//! The server answers every request with a JSON object carrying at least a
//! `success` boolean. Anything that does not parse is a failed response,
//! never an error.

use serde_json::{Map, Value};

/// Parsed upload response
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResponse {
    /// HTTP status, `None` when the request never produced one
    pub status: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
    /// Server asks the client to drop chunk progress and start over
    pub reset: bool,
    /// Server forbids further retries of this file
    pub prevent_retry: bool,
    /// Full JSON body
    pub body: Value,
}

impl UploadResponse {
    /// Parse a response body.
    ///
    /// `prevent_retry_property` names the boolean property that forbids retries.
    pub fn parse(status: u16, body: &str, prevent_retry_property: &str) -> Self {
        let value = match serde_json::from_str::<Value>(body.trim()) {
            Ok(value @ Value::Object(_)) => value,
            Ok(other) => {
                tracing::error!(body = %other, "Upload response is not a JSON object");
                Value::Object(Map::new())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse upload response");
                Value::Object(Map::new())
            }
        };

        Self::from_value(Some(status), value, prevent_retry_property)
    }

    /// Build from an already-decoded JSON object
    pub fn from_value(status: Option<u16>, body: Value, prevent_retry_property: &str) -> Self {
        let flag = |name: &str| body.get(name).and_then(Value::as_bool).unwrap_or(false);

        Self {
            status,
            success: flag("success"),
            error: body
                .get("error")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            reset: flag("reset"),
            prevent_retry: flag(prevent_retry_property),
            body,
        }
    }

    /// Failure synthesized for a request that never got a usable answer
    pub fn transport_failure(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut body = Map::new();
        body.insert("success".into(), Value::Bool(false));
        body.insert("error".into(), Value::String(reason.clone()));
        Self {
            status: None,
            success: false,
            error: Some(reason),
            reset: false,
            prevent_retry: false,
            body: Value::Object(body),
        }
    }

    /// Non-200 status, `success: false`, or a reset instruction
    pub fn is_error(&self) -> bool {
        self.status != Some(200) || !self.success || self.reset
    }

    /// Human readable failure reason, `None` for successful responses
    pub fn failure_reason(&self) -> Option<String> {
        if self.success && self.status == Some(200) {
            return None;
        }
        if let Some(ref error) = self.error {
            return Some(error.clone());
        }
        match self.status {
            Some(status) if status != 200 => {
                Some(format!("Server returned response code {}", status))
            }
            _ => Some("Upload failure reason unknown".to_string()),
        }
    }
}
