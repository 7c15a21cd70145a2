//! Session and widget bootstrap controller: brings an embedded, script-delivered
//! conversational widget to a usable state and keeps it there.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use shared::domain::{ColorScheme, FactAction};
use tracing::info;

pub mod config;
mod controller;
pub mod debug_trace;
pub mod dedup;
pub mod error_state;
mod reset;
pub mod script_monitor;
pub mod session;

pub use controller::{ControllerSnapshot, WidgetController, RECORD_FACT_TOOL, SWITCH_THEME_TOOL};
pub use session::{ClientSecret, HttpSessionEndpoint, SessionEndpoint, SessionTokenProvider};

/// Host-visible outputs, each fired at most once per underlying widget event.
#[async_trait]
pub trait HostCallbacks: Send + Sync {
    async fn on_theme_request(&self, scheme: ColorScheme);
    async fn on_widget_action(&self, action: FactAction) -> Result<()>;
    async fn on_response_end(&self);
}

/// Host that only records usage in the log.
pub struct LoggingHost;

#[async_trait]
impl HostCallbacks for LoggingHost {
    async fn on_theme_request(&self, scheme: ColorScheme) {
        info!(scheme = scheme.as_str(), "host: theme requested");
    }

    async fn on_widget_action(&self, action: FactAction) -> Result<()> {
        match action {
            FactAction::Save { fact_id, fact_text } => {
                info!(%fact_id, text_len = fact_text.len(), "host: fact recorded");
            }
        }
        Ok(())
    }

    async fn on_response_end(&self) {
        info!("host: response completed");
    }
}

/// What the host should render, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum WidgetView {
    /// Stays mounted once the widget has initialized; errors become an overlay.
    Widget { overlay_error: Option<String> },
    Blocked { message: String, retryable: bool },
    Loading,
    /// Preconditions met or timed out without a control handle; offers manual reset.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    ScriptLoaded,
    ScriptFailed(String),
    SessionReady,
    SessionFailed(String),
    WidgetReady,
    ControlFailed(String),
    ControlReleased,
    InitializingTimedOut,
    Reset,
}
