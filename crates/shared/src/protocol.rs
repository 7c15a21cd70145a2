use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureToggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionFeatures {
    pub file_upload: FeatureToggle,
}

/// Body POSTed to the session creation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub workflow: WorkflowRef,
    #[serde(rename = "chatkit_configuration")]
    pub configuration: SessionFeatures,
}

impl CreateSessionRequest {
    pub fn new(workflow_id: impl Into<String>, attachments_enabled: bool) -> Self {
        Self {
            workflow: WorkflowRef {
                id: workflow_id.into(),
            },
            configuration: SessionFeatures {
                file_upload: FeatureToggle {
                    enabled: attachments_enabled,
                },
            },
        }
    }
}

/// Raw transport-level reply; the body is parsed later and independently of the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSessionResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl RawSessionResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_body_nests_workflow_and_feature_flags() {
        let body = serde_json::to_value(CreateSessionRequest::new("wf_123", true)).expect("json");
        assert_eq!(
            body,
            serde_json::json!({
                "workflow": { "id": "wf_123" },
                "chatkit_configuration": { "file_upload": { "enabled": true } }
            })
        );
    }

    #[test]
    fn only_2xx_counts_as_transport_success() {
        let mut response = RawSessionResponse {
            status: 204,
            status_text: "No Content".into(),
            body: String::new(),
        };
        assert!(response.is_success());
        response.status = 503;
        assert!(!response.is_success());
    }
}
