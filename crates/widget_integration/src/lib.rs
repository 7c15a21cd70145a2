//! Boundary to the third-party widget runtime: readiness signals, the opaque
//! control handle, and the configuration payload handed over at mount.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use shared::domain::{ColorScheme, ThreadId, ToolInvocation, ToolResult};
use tokio::sync::broadcast;
use tracing::debug;

/// Custom element the runtime registers once its script has loaded.
pub const WIDGET_ELEMENT_NAME: &str = "openai-chatkit";

const SCRIPT_SIGNAL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSignal {
    Loaded,
    Failed { detail: String },
}

/// Process-wide script load signals. Dropping the receiver unsubscribes.
pub trait ScriptSignalNotifier: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ScriptSignal>;
}

pub struct ScriptSignalBus {
    tx: broadcast::Sender<ScriptSignal>,
}

impl ScriptSignalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SCRIPT_SIGNAL_CAPACITY);
        Self { tx }
    }

    pub fn emit_loaded(&self) {
        let delivered = self.tx.send(ScriptSignal::Loaded).unwrap_or(0);
        debug!(delivered, "script signal: loaded");
    }

    pub fn emit_failed(&self, detail: impl Into<String>) {
        let delivered = self
            .tx
            .send(ScriptSignal::Failed {
                detail: detail.into(),
            })
            .unwrap_or(0);
        debug!(delivered, "script signal: failed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ScriptSignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptSignalNotifier for ScriptSignalBus {
    fn subscribe(&self) -> broadcast::Receiver<ScriptSignal> {
        self.tx.subscribe()
    }
}

/// Opaque "the widget is live and driveable" capability.
pub trait WidgetControl: Send + Sync {
    fn describe(&self) -> String;
}

/// Called by the runtime whenever it needs a client secret.
#[async_trait]
pub trait ClientSecretSource: Send + Sync {
    async fn client_secret(&self, current: Option<String>) -> Result<String>;
}

/// Tool and lifecycle callbacks the runtime invokes after mount.
#[async_trait]
pub trait WidgetEventHandler: Send + Sync {
    async fn on_client_tool(&self, invocation: ToolInvocation) -> ToolResult;
    async fn on_response_start(&self);
    async fn on_response_end(&self);
    async fn on_thread_change(&self, thread_id: Option<ThreadId>);
    async fn on_error(&self, error: String);
    async fn on_control_released(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarterPrompt {
    pub label: String,
    pub prompt: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeOptions {
    pub color_scheme: ColorScheme,
    pub accent_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartScreenOptions {
    pub greeting: String,
    pub prompts: Vec<StarterPrompt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposerOptions {
    pub placeholder: String,
    pub attachments_enabled: bool,
}

/// Handed to the runtime exactly once per controller; rebuilding it is
/// equivalent to forcing the widget to re-initialize.
pub struct WidgetConfig {
    pub api: Arc<dyn ClientSecretSource>,
    pub handler: Arc<dyn WidgetEventHandler>,
    pub theme: ThemeOptions,
    pub start_screen: StartScreenOptions,
    pub composer: ComposerOptions,
    pub thread_item_feedback: bool,
}

impl fmt::Debug for WidgetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetConfig")
            .field("theme", &self.theme)
            .field("start_screen", &self.start_screen)
            .field("composer", &self.composer)
            .field("thread_item_feedback", &self.thread_item_feedback)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WidgetRuntime: Send + Sync {
    fn is_element_registered(&self, element_name: &str) -> bool;
    async fn obtain_control(&self, config: Arc<WidgetConfig>) -> Result<Arc<dyn WidgetControl>>;
}

/// Runtime without a renderer. Obtains control the way the hosted widget
/// does: by asking the configuration for a client secret.
pub struct HeadlessWidgetRuntime {
    registered: AtomicBool,
    instances: AtomicU64,
}

impl HeadlessWidgetRuntime {
    pub fn new() -> Self {
        Self {
            registered: AtomicBool::new(false),
            instances: AtomicU64::new(0),
        }
    }

    pub fn registered() -> Self {
        let runtime = Self::new();
        runtime.register_element();
        runtime
    }

    pub fn register_element(&self) {
        self.registered.store(true, Ordering::SeqCst);
    }

    /// Marks the element registered and announces it, like a script `onload`.
    pub fn load_script(&self, signals: &ScriptSignalBus) {
        self.register_element();
        signals.emit_loaded();
    }

    pub fn instances_created(&self) -> u64 {
        self.instances.load(Ordering::SeqCst)
    }
}

impl Default for HeadlessWidgetRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WidgetRuntime for HeadlessWidgetRuntime {
    fn is_element_registered(&self, element_name: &str) -> bool {
        element_name == WIDGET_ELEMENT_NAME && self.registered.load(Ordering::SeqCst)
    }

    async fn obtain_control(&self, config: Arc<WidgetConfig>) -> Result<Arc<dyn WidgetControl>> {
        if !self.registered.load(Ordering::SeqCst) {
            bail!("{WIDGET_ELEMENT_NAME} is not registered");
        }

        let secret = config
            .api
            .client_secret(None)
            .await
            .context("headless runtime could not obtain a client secret")?;
        if secret.is_empty() {
            bail!("client secret source returned an empty secret");
        }

        let instance = self.instances.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(instance, "headless runtime: control obtained");
        Ok(Arc::new(HeadlessControl { instance }))
    }
}

pub struct HeadlessControl {
    instance: u64,
}

impl WidgetControl for HeadlessControl {
    fn describe(&self) -> String {
        format!("headless-control#{}", self.instance)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
