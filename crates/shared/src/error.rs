use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three independent error sources merged into the blocking error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorChannel {
    Script,
    Session,
    Integration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not configured: {0}")]
    NotConfigured(String),
    #[error("session request failed: {0}")]
    Transport(String),
    #[error("session endpoint returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("invalid session response body: {0}")]
    InvalidBody(String),
    #[error("Missing client secret in response")]
    MissingClientSecret,
}

impl SessionError {
    /// Detail shown to the user. Status failures and a missing secret log
    /// differently but surface the same way.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured(detail) | Self::Transport(detail) => detail.clone(),
            Self::Status { detail, .. } => detail.clone(),
            Self::InvalidBody(reason) => format!("Invalid session response: {reason}"),
            Self::MissingClientSecret => "Missing client secret in response".to_string(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("integration error: {0}")]
    Integration(String),
}

impl BootstrapError {
    pub fn channel(&self) -> ErrorChannel {
        match self {
            Self::Script(_) => ErrorChannel::Script,
            Self::Configuration(_) | Self::Session(_) => ErrorChannel::Session,
            Self::Integration(_) => ErrorChannel::Integration,
        }
    }

    /// Nothing in the bootstrap path is retried automatically.
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(detail) | Self::Integration(detail) => detail.clone(),
            Self::Script(detail) => format!("Error: {detail}"),
            Self::Session(err) => err.user_message(),
        }
    }
}
