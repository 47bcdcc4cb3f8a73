//! Request/response envelopes exchanged with isolation mechanisms.
//!
//! The same JSON shape goes over the worker process's stdin/stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SandboxError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRequest {
    pub id: String,
    /// A self-contained ES module; every import must already be a data URI.
    pub code: String,
    pub export_name: String,
    #[serde(default = "empty_object")]
    pub runtime_input: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl SandboxRequest {
    pub fn new(id: impl Into<String>, code: impl Into<String>, export_name: impl Into<String>, runtime_input: Value) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            export_name: export_name.into(),
            runtime_input,
        }
    }

    /// Reject envelopes that no mechanism should receive.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.id.trim().is_empty() {
            return Err(SandboxError::InvalidRequest("id must be a non-empty string".to_string()));
        }
        if self.export_name.trim().is_empty() {
            return Err(SandboxError::InvalidRequest(
                "exportName must be a non-empty string".to_string(),
            ));
        }
        if !self.runtime_input.is_object() {
            return Err(SandboxError::InvalidRequest("runtimeInput must be an object".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SandboxResponse {
    pub fn success(id: &str, output: Value) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate() {
        let ok = SandboxRequest::new("r1", "export default 1", "default", json!({}));
        assert!(ok.validate().is_ok());

        let blank_id = SandboxRequest::new("  ", "", "default", json!({}));
        assert!(matches!(blank_id.validate(), Err(SandboxError::InvalidRequest(_))));

        let no_export = SandboxRequest::new("r1", "", "", json!({}));
        assert!(no_export.validate().is_err());

        let array_input = SandboxRequest::new("r1", "", "default", json!([1, 2]));
        assert!(array_input.validate().is_err());
    }

    #[test]
    fn test_wire_shape() {
        let request: SandboxRequest =
            serde_json::from_value(json!({"id": "a", "code": "x", "exportName": "run"})).unwrap();
        assert_eq!(request.runtime_input, json!({}));

        let response = serde_json::to_value(SandboxResponse::failure("a", "boom")).unwrap();
        assert_eq!(response, json!({"id": "a", "ok": false, "error": "boom"}));
    }
}
