use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use shared::{
    error::SessionError,
    protocol::{CreateSessionRequest, RawSessionResponse},
};
use tracing::{debug, error, info, warn};
use url::Url;
use zeroize::Zeroize;

use crate::config::{prepare_session_endpoint, Settings, MISSING_WORKFLOW_MESSAGE};

/// Short-lived credential authorizing the widget's backend calls.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret(String);

impl ClientSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(<redacted>)")
    }
}

impl Drop for ClientSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[async_trait]
pub trait SessionEndpoint: Send + Sync {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<RawSessionResponse>;
}

pub struct HttpSessionEndpoint {
    http: Client,
    url: Url,
}

impl HttpSessionEndpoint {
    pub fn new(url: Url) -> Self {
        Self {
            http: Client::new(),
            url,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(prepare_session_endpoint(&settings.session_endpoint)?))
    }
}

#[async_trait]
impl SessionEndpoint for HttpSessionEndpoint {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<RawSessionResponse> {
        let response = self
            .http
            .post(self.url.clone())
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to reach session endpoint {}", self.url))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read session response body")?;

        Ok(RawSessionResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// Exchanges the workflow identity for a client secret. Callers keep at most
/// one `acquire` in flight.
pub struct SessionTokenProvider {
    endpoint: Arc<dyn SessionEndpoint>,
    workflow_id: Option<String>,
    attachments_enabled: bool,
}

impl SessionTokenProvider {
    pub fn new(
        endpoint: Arc<dyn SessionEndpoint>,
        workflow_id: Option<String>,
        attachments_enabled: bool,
    ) -> Self {
        Self {
            endpoint,
            workflow_id,
            attachments_enabled,
        }
    }

    pub fn from_settings(settings: &Settings, endpoint: Arc<dyn SessionEndpoint>) -> Self {
        Self::new(
            endpoint,
            settings.configured_workflow_id().map(str::to_owned),
            settings.attachments_enabled,
        )
    }

    pub fn is_configured(&self) -> bool {
        self.workflow_id.is_some()
    }

    pub async fn acquire(
        &self,
        existing: Option<ClientSecret>,
    ) -> std::result::Result<ClientSecret, SessionError> {
        if let Some(existing) = existing.filter(|secret| !secret.is_empty()) {
            debug!("session: reusing existing client secret");
            return Ok(existing);
        }

        let Some(workflow_id) = self.workflow_id.as_deref() else {
            return Err(SessionError::NotConfigured(MISSING_WORKFLOW_MESSAGE.to_string()));
        };

        info!(workflow_id, "session: requesting client secret");
        let request = CreateSessionRequest::new(workflow_id, self.attachments_enabled);
        let raw = self
            .endpoint
            .create_session(&request)
            .await
            .map_err(|err| {
                error!("session: create session request failed: {err:#}");
                SessionError::Transport(format!("{err:#}"))
            })?;

        interpret_session_response(&raw)
    }
}

pub(crate) fn interpret_session_response(
    raw: &RawSessionResponse,
) -> std::result::Result<ClientSecret, SessionError> {
    info!(
        status = raw.status,
        ok = raw.is_success(),
        body_len = raw.body.len(),
        "session: create session response"
    );

    // An absent body reads as an empty object; anything else must be JSON.
    let parsed = if raw.body.trim().is_empty() {
        Ok(Value::Object(serde_json::Map::new()))
    } else {
        serde_json::from_str::<Value>(&raw.body)
    };

    if !raw.is_success() {
        let fallback = if raw.status_text.is_empty() {
            format!("HTTP {}", raw.status)
        } else {
            raw.status_text.clone()
        };
        let detail = match &parsed {
            Ok(payload) => extract_error_detail(payload, &fallback),
            Err(err) => {
                warn!("session: failed to parse error body: {err}");
                fallback
            }
        };
        error!(status = raw.status, %detail, "session: endpoint rejected request");
        return Err(SessionError::Status {
            status: raw.status,
            detail,
        });
    }

    let payload = parsed.map_err(|err| {
        error!("session: failed to parse create session response: {err}");
        SessionError::InvalidBody(err.to_string())
    })?;

    match payload
        .get("client_secret")
        .and_then(Value::as_str)
        .filter(|secret| !secret.is_empty())
    {
        Some(secret) => Ok(ClientSecret::new(secret)),
        None => {
            error!(status = raw.status, "session: response is missing client_secret");
            Err(SessionError::MissingClientSecret)
        }
    }
}

/// Best-effort human readable detail from an error payload.
pub fn extract_error_detail(payload: &Value, fallback: &str) -> String {
    fn message_of(value: &Value) -> Option<&str> {
        match value {
            Value::String(message) => Some(message),
            Value::Object(map) => map.get("message").and_then(Value::as_str),
            _ => None,
        }
    }

    if let Some(message) = payload.get("error").and_then(message_of) {
        return message.to_string();
    }

    match payload.get("details") {
        Some(Value::String(details)) => return details.clone(),
        Some(Value::Object(details)) => {
            if let Some(message) = details.get("error").and_then(message_of) {
                return message.to_string();
            }
        }
        _ => {}
    }

    if let Some(message) = payload.get("message").and_then(Value::as_str) {
        return message.to_string();
    }

    fallback.to_string()
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
