use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use shared::domain::ColorScheme;
use tracing::warn;
use url::Url;
use widget_integration::StarterPrompt;

pub const DEFAULT_SETTINGS_FILE: &str = "widget.toml";
pub const MISSING_WORKFLOW_MESSAGE: &str =
    "Set CHATKIT_WORKFLOW_ID in your environment or widget.toml.";

const WORKFLOW_PLACEHOLDER_PREFIX: &str = "wf_replace";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarterPromptSetting {
    pub label: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl From<&StarterPromptSetting> for StarterPrompt {
    fn from(value: &StarterPromptSetting) -> Self {
        Self {
            label: value.label.clone(),
            prompt: value.prompt.clone(),
            icon: value.icon.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub workflow_id: Option<String>,
    pub session_endpoint: String,
    pub script_timeout_ms: u64,
    pub initializing_timeout_ms: u64,
    pub attachments_enabled: bool,
    pub color_scheme: ColorScheme,
    pub accent_color: Option<String>,
    pub greeting: String,
    pub composer_placeholder: String,
    pub starter_prompts: Vec<StarterPromptSetting>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workflow_id: None,
            session_endpoint: "http://127.0.0.1:3000/api/create-session".into(),
            script_timeout_ms: 5_000,
            initializing_timeout_ms: 15_000,
            attachments_enabled: true,
            color_scheme: ColorScheme::Light,
            accent_color: None,
            greeting: "How can I help you today?".into(),
            composer_placeholder: "Ask anything...".into(),
            starter_prompts: vec![
                StarterPromptSetting {
                    label: "What can you do?".into(),
                    prompt: "What can you do?".into(),
                    icon: Some("circle-question".into()),
                },
                StarterPromptSetting {
                    label: "Remember something".into(),
                    prompt: "Please remember a fact about me.".into(),
                    icon: Some("notebook".into()),
                },
            ],
        }
    }
}

impl Settings {
    /// A workflow id counts only when present, non-blank and not the template placeholder.
    pub fn configured_workflow_id(&self) -> Option<&str> {
        self.workflow_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && !id.starts_with(WORKFLOW_PLACEHOLDER_PREFIX))
    }

    pub fn is_workflow_configured(&self) -> bool {
        self.configured_workflow_id().is_some()
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn initializing_timeout(&self) -> Duration {
        Duration::from_millis(self.initializing_timeout_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    workflow_id: Option<String>,
    session_endpoint: Option<String>,
    script_timeout_ms: Option<u64>,
    initializing_timeout_ms: Option<u64>,
    attachments_enabled: Option<bool>,
    color_scheme: Option<String>,
    accent_color: Option<String>,
    greeting: Option<String>,
    composer_placeholder: Option<String>,
    starter_prompts: Option<Vec<StarterPromptSetting>>,
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), "ignoring unreadable settings file: {err}"),
        }
    }

    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.workflow_id {
        settings.workflow_id = Some(v);
    }
    if let Some(v) = file_cfg.session_endpoint {
        settings.session_endpoint = v;
    }
    if let Some(v) = file_cfg.script_timeout_ms {
        settings.script_timeout_ms = v;
    }
    if let Some(v) = file_cfg.initializing_timeout_ms {
        settings.initializing_timeout_ms = v;
    }
    if let Some(v) = file_cfg.attachments_enabled {
        settings.attachments_enabled = v;
    }
    if let Some(v) = file_cfg.color_scheme {
        match ColorScheme::parse(&v) {
            Some(scheme) => settings.color_scheme = scheme,
            None => warn!(value = %v, "ignoring unknown color_scheme in settings file"),
        }
    }
    if let Some(v) = file_cfg.accent_color {
        settings.accent_color = Some(v);
    }
    if let Some(v) = file_cfg.greeting {
        settings.greeting = v;
    }
    if let Some(v) = file_cfg.composer_placeholder {
        settings.composer_placeholder = v;
    }
    if let Some(v) = file_cfg.starter_prompts {
        settings.starter_prompts = v;
    }
}

/// Plain names first, then `APP__` names, so the prefixed form wins.
pub(crate) fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let overrides: HashMap<&str, String> = [
        "CHATKIT_WORKFLOW_ID",
        "APP__WORKFLOW_ID",
        "CHATKIT_SESSION_ENDPOINT",
        "APP__SESSION_ENDPOINT",
        "APP__SCRIPT_TIMEOUT_MS",
        "APP__INITIALIZING_TIMEOUT_MS",
        "APP__ATTACHMENTS_ENABLED",
        "APP__COLOR_SCHEME",
    ]
    .into_iter()
    .filter_map(|name| lookup(name).map(|value| (name, value)))
    .collect();

    for name in ["CHATKIT_WORKFLOW_ID", "APP__WORKFLOW_ID"] {
        if let Some(v) = overrides.get(name) {
            settings.workflow_id = Some(v.clone());
        }
    }
    for name in ["CHATKIT_SESSION_ENDPOINT", "APP__SESSION_ENDPOINT"] {
        if let Some(v) = overrides.get(name) {
            settings.session_endpoint = v.clone();
        }
    }

    if let Some(v) = overrides.get("APP__SCRIPT_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.script_timeout_ms = parsed,
            Err(err) => warn!(value = %v, "ignoring APP__SCRIPT_TIMEOUT_MS: {err}"),
        }
    }
    if let Some(v) = overrides.get("APP__INITIALIZING_TIMEOUT_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.initializing_timeout_ms = parsed,
            Err(err) => warn!(value = %v, "ignoring APP__INITIALIZING_TIMEOUT_MS: {err}"),
        }
    }
    if let Some(v) = overrides.get("APP__ATTACHMENTS_ENABLED") {
        match v.parse::<bool>() {
            Ok(parsed) => settings.attachments_enabled = parsed,
            Err(err) => warn!(value = %v, "ignoring APP__ATTACHMENTS_ENABLED: {err}"),
        }
    }
    if let Some(v) = overrides.get("APP__COLOR_SCHEME") {
        match ColorScheme::parse(v) {
            Some(scheme) => settings.color_scheme = scheme,
            None => warn!(value = %v, "ignoring unknown APP__COLOR_SCHEME"),
        }
    }
}

pub fn prepare_session_endpoint(raw_endpoint: &str) -> anyhow::Result<Url> {
    let raw_endpoint = raw_endpoint.trim();
    if raw_endpoint.is_empty() {
        bail!("session endpoint must not be empty");
    }

    let url = Url::parse(raw_endpoint)
        .with_context(|| format!("invalid session endpoint '{raw_endpoint}'"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => bail!("session endpoint must use http or https, got '{other}'"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
