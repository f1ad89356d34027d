//! Kernel wire envelope
//!
//! Every request carries a [`MessageId`]; the kernel echoes it on the
//! response so concurrent round trips can complete in any order.
//!
//! ```text
//! → {"id": "…", "type": "edit", "step_type": "graph", "params": {…}, "step_id": "…"}
//! ← {"id": "…", "result": {…}}
//! ← {"id": "…", "error": {"error_type": "…", "header": "…", "to_fix": "…"}}
//! ```

use crate::error::{ChannelError, KernelErrorPayload};
use crate::imports::StepImportData;
use crate::types::{EditRequest, MessageId};
use serde::{Deserialize, Serialize};

/// Replay the analysis with a corrected set of import recipes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Saved analysis to replay; `None` replays the current steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_name: Option<String>,
    pub step_import_data: Vec<StepImportData>,
}

/// Request sent to the kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRequest {
    pub id: MessageId,
    #[serde(flatten)]
    pub body: KernelRequestBody,
}

impl KernelRequest {
    /// Wrap a body with a fresh id
    #[inline]
    #[must_use]
    pub fn new(body: KernelRequestBody) -> Self {
        Self {
            id: MessageId::new(),
            body,
        }
    }
}

/// Request payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelRequestBody {
    Edit(EditRequest),
    GetImportsForAnalysis { analysis_name: String },
    GetImportsForCurrentSteps,
    TestImports { imports: Vec<StepImportData> },
    GetPathJoined { path_parts: Vec<String> },
    ReplayAnalysis(ReplayRequest),
}

impl KernelRequestBody {
    /// Short name for logs and errors
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Edit(_) => "edit",
            Self::GetImportsForAnalysis { .. } => "get_imports_for_analysis",
            Self::GetImportsForCurrentSteps => "get_imports_for_current_steps",
            Self::TestImports { .. } => "test_imports",
            Self::GetPathJoined { .. } => "get_path_joined",
            Self::ReplayAnalysis(_) => "replay_analysis",
        }
    }
}

/// Response from the kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelResponse {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<KernelErrorPayload>,
}

impl KernelResponse {
    /// Successful response
    #[inline]
    #[must_use]
    pub fn ok(id: MessageId, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Kernel-reported failure
    #[inline]
    #[must_use]
    pub fn err(id: MessageId, error: KernelErrorPayload) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Payload or kernel error; a missing result decodes as `null`
    pub fn into_result(self) -> Result<serde_json::Value, ChannelError> {
        match self.error {
            Some(payload) => Err(ChannelError::Kernel(payload)),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StepId, StepType};
    use serde_json::json;

    #[test]
    fn edit_request_is_flattened_with_type_tag() {
        let request = KernelRequest::new(KernelRequestBody::Edit(EditRequest::overwrite(
            StepType::Graph,
            json!({"graph_id": "g"}),
            StepId::from("s1"),
        )));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["type"], "edit");
        assert_eq!(value["step_type"], "graph");
        assert_eq!(value["step_id"], "s1");
        assert_eq!(value["id"], json!(request.id.0.to_string()));

        let back: KernelRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn unit_body_round_trips() {
        let request = KernelRequest::new(KernelRequestBody::GetImportsForCurrentSteps);
        let text = serde_json::to_string(&request).unwrap();
        assert!(text.contains("\"type\":\"get_imports_for_current_steps\""));
        let back: KernelRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back.body.kind(), "get_imports_for_current_steps");
    }

    #[test]
    fn error_response_wins_over_result() {
        let id = MessageId::new();
        let response = KernelResponse::err(id, KernelErrorPayload::new("e", "bad", "fix it"));
        assert!(matches!(
            response.into_result(),
            Err(ChannelError::Kernel(payload)) if payload.to_fix == "fix it"
        ));

        let parsed: KernelResponse =
            serde_json::from_value(json!({"id": id, "result": {"ok": true}})).unwrap();
        assert_eq!(parsed.into_result().unwrap(), json!({"ok": true}));
    }
}
