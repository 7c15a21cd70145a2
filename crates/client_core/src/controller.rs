use std::sync::{Arc, OnceLock, Weak};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use shared::{
    domain::{ColorScheme, FactAction, FactId, ScriptStatus, SessionPhase, ThreadId, ToolInvocation, ToolResult},
    error::{BootstrapError, SessionError},
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use widget_integration::{
    ClientSecretSource, ComposerOptions, ScriptSignalNotifier, StartScreenOptions, ThemeOptions,
    WidgetConfig, WidgetControl, WidgetEventHandler, WidgetRuntime,
};

use crate::{
    config::{Settings, MISSING_WORKFLOW_MESSAGE},
    debug_trace::{DebugEntry, DebugTrace},
    dedup::FactDeduplicationTracker,
    error_state::{ErrorState, ErrorUpdate},
    script_monitor::{ScriptEvent, ScriptReadinessMonitor},
    session::{ClientSecret, HttpSessionEndpoint, SessionTokenProvider},
    ControllerEvent, HostCallbacks, WidgetView,
};

pub const SWITCH_THEME_TOOL: &str = "switch_theme";
pub const RECORD_FACT_TOOL: &str = "record_fact";

const CONTROLLER_EVENT_CAPACITY: usize = 64;

pub(crate) enum SessionState {
    Idle,
    Initializing,
    Ready(ClientSecret),
    Error,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Initializing => SessionPhase::Initializing,
            Self::Ready(_) => SessionPhase::Ready,
            Self::Error => SessionPhase::Error,
        }
    }
}

pub(crate) struct ControllerState {
    pub(crate) mounted: bool,
    /// Bumped on every mount, reset and unmount; async results from older generations are dropped.
    pub(crate) generation: u64,
    pub(crate) script_status: ScriptStatus,
    pub(crate) session: SessionState,
    pub(crate) errors: ErrorState,
    pub(crate) control: Option<Arc<dyn WidgetControl>>,
    pub(crate) control_requested: bool,
    pub(crate) has_ever_initialized: bool,
    pub(crate) is_initializing_session: bool,
    pub(crate) facts: FactDeduplicationTracker,
    pub(crate) tasks: Vec<JoinHandle<()>>,
    trace: DebugTrace,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            mounted: false,
            generation: 0,
            script_status: ScriptStatus::Pending,
            session: SessionState::Idle,
            errors: ErrorState::default(),
            control: None,
            control_requested: false,
            has_ever_initialized: false,
            is_initializing_session: true,
            facts: FactDeduplicationTracker::new(),
            tasks: Vec::new(),
            trace: DebugTrace::default(),
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.mounted && self.generation == generation
    }

    fn view(&self) -> WidgetView {
        let blocking = self.errors.blocking_error().map(str::to_owned);
        if self.has_ever_initialized {
            return WidgetView::Widget {
                overlay_error: blocking,
            };
        }
        if let Some(message) = blocking {
            return WidgetView::Blocked {
                message,
                retryable: self.errors.retryable(),
            };
        }
        if self.is_initializing_session {
            return WidgetView::Loading;
        }
        WidgetView::Fallback
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            generation: self.generation,
            mounted: self.mounted,
            script_status: self.script_status,
            session: self.session.phase(),
            errors: self.errors.clone(),
            blocking_error: self.errors.blocking_error().map(str::to_owned),
            is_initializing_session: self.is_initializing_session,
            has_ever_initialized: self.has_ever_initialized,
            has_control: self.control.is_some(),
            processed_facts: self.facts.len(),
            view: self.view(),
        }
    }

    pub(crate) fn record(&mut self, component: &str) {
        let snapshot = self.snapshot();
        self.trace.record(component, &snapshot);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub generation: u64,
    pub mounted: bool,
    pub script_status: ScriptStatus,
    pub session: SessionPhase,
    pub errors: ErrorState,
    pub blocking_error: Option<String>,
    pub is_initializing_session: bool,
    pub has_ever_initialized: bool,
    pub has_control: bool,
    pub processed_facts: usize,
    pub view: WidgetView,
}

/// Owns every piece of bootstrap state; collaborators report facts to it and
/// only it mutates what the host observes.
pub struct WidgetController {
    settings: Arc<Settings>,
    runtime: Arc<dyn WidgetRuntime>,
    notifier: Arc<dyn ScriptSignalNotifier>,
    session_provider: Arc<SessionTokenProvider>,
    host: Arc<dyn HostCallbacks>,
    widget_config: OnceLock<Arc<WidgetConfig>>,
    self_ref: Weak<Self>,
    pub(crate) inner: Mutex<ControllerState>,
    session_changed: watch::Sender<u64>,
    pub(crate) events: broadcast::Sender<ControllerEvent>,
}

impl WidgetController {
    pub fn new(
        settings: Settings,
        runtime: Arc<dyn WidgetRuntime>,
        notifier: Arc<dyn ScriptSignalNotifier>,
        host: Arc<dyn HostCallbacks>,
    ) -> Result<Arc<Self>> {
        let endpoint = Arc::new(HttpSessionEndpoint::from_settings(&settings)?);
        let session_provider = Arc::new(SessionTokenProvider::from_settings(&settings, endpoint));
        Ok(Self::new_with_dependencies(
            settings,
            runtime,
            notifier,
            session_provider,
            host,
        ))
    }

    pub fn new_with_dependencies(
        settings: Settings,
        runtime: Arc<dyn WidgetRuntime>,
        notifier: Arc<dyn ScriptSignalNotifier>,
        session_provider: Arc<SessionTokenProvider>,
        host: Arc<dyn HostCallbacks>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(CONTROLLER_EVENT_CAPACITY);
        let (session_changed, _) = watch::channel(0);
        Arc::new_cyclic(|self_ref| Self {
            settings: Arc::new(settings),
            runtime,
            notifier,
            session_provider,
            host,
            widget_config: OnceLock::new(),
            self_ref: self_ref.clone(),
            inner: Mutex::new(ControllerState::new()),
            session_changed,
            events,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Built on first use and reused for the controller's whole life, resets included.
    pub fn widget_config(&self) -> Arc<WidgetConfig> {
        self.widget_config
            .get_or_init(|| {
                let bridge = Arc::new(ControllerBridge {
                    controller: self.self_ref.clone(),
                });
                Arc::new(WidgetConfig {
                    api: bridge.clone(),
                    handler: bridge,
                    theme: ThemeOptions {
                        color_scheme: self.settings.color_scheme,
                        accent_color: self.settings.accent_color.clone(),
                    },
                    start_screen: StartScreenOptions {
                        greeting: self.settings.greeting.clone(),
                        prompts: self.settings.starter_prompts.iter().map(Into::into).collect(),
                    },
                    composer: ComposerOptions {
                        placeholder: self.settings.composer_placeholder.clone(),
                        attachments_enabled: self.settings.attachments_enabled,
                    },
                    thread_item_feedback: false,
                })
            })
            .clone()
    }

    pub async fn mount(self: &Arc<Self>) {
        let mut guard = self.inner.lock().await;
        if guard.mounted {
            debug!("controller: mount ignored, already mounted");
            return;
        }
        guard.mounted = true;
        guard.generation += 1;
        self.begin_bootstrap(&mut guard);
    }

    /// Cancels timers and listeners; results still in flight are discarded.
    pub async fn unmount(&self) {
        let mut guard = self.inner.lock().await;
        if !guard.mounted {
            return;
        }
        guard.discard_derived_state();
        guard.mounted = false;
        guard.record("unmount");
        info!(generation = guard.generation, "controller: unmounted");
        drop(guard);
        self.notify_session_changed();
    }

    pub async fn view(&self) -> WidgetView {
        self.inner.lock().await.view()
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.inner.lock().await.snapshot()
    }

    pub async fn debug_trace(&self) -> Vec<DebugEntry> {
        self.inner.lock().await.trace.entries()
    }

    pub async fn clear_debug_trace(&self) {
        self.inner.lock().await.trace.clear();
    }

    pub(crate) fn begin_bootstrap(self: &Arc<Self>, state: &mut ControllerState) {
        let generation = state.generation;
        state.is_initializing_session = true;
        info!(generation, "controller: bootstrap started");

        let mut monitor = ScriptReadinessMonitor::attach(
            Arc::clone(&self.runtime),
            self.notifier.as_ref(),
            self.settings.script_timeout(),
        );
        state.script_status = monitor.status();
        if state.script_status == ScriptStatus::Ready {
            let _ = self.events.send(ControllerEvent::ScriptLoaded);
        } else {
            let controller = Arc::clone(self);
            state.tasks.push(tokio::spawn(async move {
                let event = monitor.resolve().await;
                controller.apply_script_event(generation, event).await;
            }));
        }

        if self.session_provider.is_configured() {
            self.start_session_fetch(state);
        } else {
            self.fail_session(
                state,
                SessionError::NotConfigured(MISSING_WORKFLOW_MESSAGE.to_string()),
            );
        }

        let controller = Arc::clone(self);
        let timeout = self.settings.initializing_timeout();
        state.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            controller.on_initializing_timeout(generation).await;
        }));

        state.record("bootstrap");
    }

    /// Starts the single acquisition for this generation; no-op once one has started.
    fn start_session_fetch(self: &Arc<Self>, state: &mut ControllerState) {
        if !matches!(state.session, SessionState::Idle) {
            return;
        }
        if !self.session_provider.is_configured() {
            self.fail_session(
                state,
                SessionError::NotConfigured(MISSING_WORKFLOW_MESSAGE.to_string()),
            );
            return;
        }

        state.session = SessionState::Initializing;
        state.errors.apply(
            ErrorUpdate::default()
                .session(None)
                .integration(None)
                .retryable(false),
        );

        let generation = state.generation;
        let controller = Arc::clone(self);
        let provider = Arc::clone(&self.session_provider);
        state.tasks.push(tokio::spawn(async move {
            let result = provider.acquire(None).await;
            controller.apply_session_result(generation, result).await;
        }));
        self.notify_session_changed();
    }

    async fn apply_script_event(self: &Arc<Self>, generation: u64, event: ScriptEvent) {
        let mut guard = self.inner.lock().await;
        if !guard.is_live(generation) {
            debug!(generation, "controller: dropping stale script event");
            return;
        }

        match event {
            ScriptEvent::Loaded => {
                info!("controller: widget script ready");
                guard.script_status = ScriptStatus::Ready;
                guard.errors.apply(ErrorUpdate::default().script(None));
                let _ = self.events.send(ControllerEvent::ScriptLoaded);
                self.maybe_request_control(&mut guard);
            }
            ScriptEvent::Failed(detail) => {
                error!(%detail, "controller: widget script failed");
                guard.script_status = ScriptStatus::Error;
                guard
                    .errors
                    .apply(ErrorUpdate::from_error(&BootstrapError::Script(detail.clone())));
                guard.is_initializing_session = false;
                let _ = self.events.send(ControllerEvent::ScriptFailed(detail));
            }
        }
        guard.record("script");
    }

    async fn apply_session_result(
        self: &Arc<Self>,
        generation: u64,
        result: std::result::Result<ClientSecret, SessionError>,
    ) {
        let mut guard = self.inner.lock().await;
        if !guard.is_live(generation) {
            debug!(generation, "controller: dropping stale session result");
            return;
        }

        match result {
            Ok(secret) => {
                info!("controller: client secret received");
                guard.session = SessionState::Ready(secret);
                guard
                    .errors
                    .apply(ErrorUpdate::default().session(None).integration(None));
                let _ = self.events.send(ControllerEvent::SessionReady);
                self.maybe_request_control(&mut guard);
            }
            Err(err) => self.fail_session(&mut guard, err),
        }
        guard.record("session");
        drop(guard);
        self.notify_session_changed();
    }

    fn fail_session(&self, state: &mut ControllerState, err: SessionError) {
        let failure = if err.is_configuration() {
            BootstrapError::Configuration(err.user_message())
        } else {
            BootstrapError::Session(err)
        };
        error!("controller: {failure}");

        state.session = SessionState::Error;
        state
            .errors
            .apply(ErrorUpdate::from_error(&failure).integration(None));
        state.is_initializing_session = false;
        let _ = self
            .events
            .send(ControllerEvent::SessionFailed(failure.user_message()));
        self.notify_session_changed();
    }

    fn maybe_request_control(self: &Arc<Self>, state: &mut ControllerState) {
        if state.control_requested
            || state.script_status != ScriptStatus::Ready
            || !matches!(state.session, SessionState::Ready(_))
        {
            return;
        }
        state.control_requested = true;
        debug!("controller: requesting widget control");

        let generation = state.generation;
        let config = self.widget_config();
        let runtime = Arc::clone(&self.runtime);
        let controller = Arc::clone(self);
        state.tasks.push(tokio::spawn(async move {
            let result = runtime.obtain_control(config).await;
            controller.apply_control_result(generation, result).await;
        }));
    }

    async fn apply_control_result(
        &self,
        generation: u64,
        result: Result<Arc<dyn WidgetControl>>,
    ) {
        let mut guard = self.inner.lock().await;
        if !guard.is_live(generation) {
            debug!(generation, "controller: dropping stale widget control");
            return;
        }

        match result {
            Ok(control) => {
                info!(control = %control.describe(), "controller: widget control available");
                guard.control = Some(control);
                guard.is_initializing_session = false;
                if !guard.has_ever_initialized {
                    guard.has_ever_initialized = true;
                    let _ = self.events.send(ControllerEvent::WidgetReady);
                }
            }
            Err(err) => {
                error!("controller: widget control unavailable: {err:#}");
                let failure = BootstrapError::Integration(err.to_string());
                guard.errors.apply(ErrorUpdate::from_error(&failure));
                guard.is_initializing_session = false;
                let _ = self
                    .events
                    .send(ControllerEvent::ControlFailed(failure.user_message()));
            }
        }
        guard.record("control");
    }

    async fn on_initializing_timeout(&self, generation: u64) {
        let mut guard = self.inner.lock().await;
        if !guard.is_live(generation) || !guard.is_initializing_session {
            return;
        }
        warn!(
            timeout_ms = self.settings.initializing_timeout_ms,
            "controller: initialization watchdog fired before widget control arrived"
        );
        guard.is_initializing_session = false;
        let _ = self.events.send(ControllerEvent::InitializingTimedOut);
        guard.record("watchdog");
    }

    pub(crate) fn notify_session_changed(&self) {
        self.session_changed.send_modify(|version| *version += 1);
    }

    /// Serves the widget's secret requests. A non-empty current secret is
    /// echoed back; otherwise the held token is returned or the single
    /// in-flight acquisition is awaited.
    pub async fn client_secret(self: &Arc<Self>, current: Option<String>) -> Result<String> {
        if let Some(current) = current.filter(|secret| !secret.is_empty()) {
            debug!("controller: widget reused its client secret");
            return Ok(current);
        }

        loop {
            let mut changed = self.session_changed.subscribe();
            {
                let mut guard = self.inner.lock().await;
                if !guard.mounted {
                    return Err(anyhow!("widget controller is not mounted"));
                }
                let idle = match &guard.session {
                    SessionState::Ready(secret) => return Ok(secret.expose().to_string()),
                    SessionState::Error => {
                        let detail = guard
                            .errors
                            .session
                            .clone()
                            .unwrap_or_else(|| "Unable to start ChatKit session.".to_string());
                        return Err(anyhow!(detail));
                    }
                    SessionState::Idle => true,
                    SessionState::Initializing => false,
                };
                if idle {
                    self.start_session_fetch(&mut guard);
                }
            }
            changed
                .changed()
                .await
                .map_err(|_| anyhow!("widget controller was dropped"))?;
        }
    }

    pub async fn handle_tool_invocation(&self, invocation: ToolInvocation) -> ToolResult {
        if !self.inner.lock().await.mounted {
            warn!(tool = %invocation.name, "controller: tool invoked while unmounted");
            return ToolResult::failed();
        }

        match invocation.name.as_str() {
            SWITCH_THEME_TOOL => {
                let requested = invocation
                    .params
                    .get("theme")
                    .and_then(Value::as_str)
                    .and_then(ColorScheme::parse);
                match requested {
                    Some(scheme) => {
                        debug!(scheme = scheme.as_str(), "controller: switch_theme");
                        self.host.on_theme_request(scheme).await;
                        ToolResult::ok()
                    }
                    None => {
                        warn!(params = ?invocation.params, "controller: unrecognized theme requested");
                        ToolResult::failed()
                    }
                }
            }
            RECORD_FACT_TOOL => self.record_fact(&invocation).await,
            other => {
                warn!(tool = other, "controller: unknown client tool");
                ToolResult::failed()
            }
        }
    }

    /// Replayed or empty ids are acknowledged without reaching the host.
    async fn record_fact(&self, invocation: &ToolInvocation) -> ToolResult {
        let fact_id = FactId::new(invocation.param_text("fact_id"));
        let accepted = {
            let mut guard = self.inner.lock().await;
            if !guard.mounted {
                return ToolResult::failed();
            }
            guard.facts.accept(&fact_id)
        };
        if !accepted {
            return ToolResult::ok();
        }

        let fact_text = collapse_whitespace(&invocation.param_text("fact_text"));
        let action = FactAction::Save {
            fact_id: fact_id.clone(),
            fact_text,
        };
        if let Err(err) = self.host.on_widget_action(action).await {
            error!(%fact_id, "controller: host failed to handle fact: {err:#}");
        }
        ToolResult::ok()
    }

    pub async fn on_response_start(&self) {
        let mut guard = self.inner.lock().await;
        if !guard.mounted {
            return;
        }
        guard
            .errors
            .apply(ErrorUpdate::default().integration(None).retryable(false));
        guard.record("response_start");
    }

    pub async fn on_response_end(&self) {
        if !self.inner.lock().await.mounted {
            debug!("controller: response end ignored while unmounted");
            return;
        }
        self.host.on_response_end().await;
    }

    pub async fn on_thread_change(&self, thread_id: Option<ThreadId>) {
        let mut guard = self.inner.lock().await;
        if !guard.mounted {
            return;
        }
        guard.facts.on_thread_change(thread_id);
        guard.record("thread_change");
    }

    /// Mid-conversation faults are rendered by the widget itself.
    pub async fn on_widget_error(&self, error: &str) {
        error!(%error, "controller: widget reported an error");
    }

    /// The widget stays mounted after a transient loss of its control handle.
    pub async fn on_control_released(&self) {
        let mut guard = self.inner.lock().await;
        if !guard.mounted {
            return;
        }
        if guard.control.take().is_some() {
            warn!(
                has_ever_initialized = guard.has_ever_initialized,
                "controller: widget control released"
            );
            let _ = self.events.send(ControllerEvent::ControlReleased);
            guard.record("control_released");
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// What the runtime holds on to; weak so the widget config does not keep the controller alive.
struct ControllerBridge {
    controller: Weak<WidgetController>,
}

#[async_trait]
impl ClientSecretSource for ControllerBridge {
    async fn client_secret(&self, current: Option<String>) -> Result<String> {
        let controller = self
            .controller
            .upgrade()
            .ok_or_else(|| anyhow!("widget controller was dropped"))?;
        controller.client_secret(current).await
    }
}

#[async_trait]
impl WidgetEventHandler for ControllerBridge {
    async fn on_client_tool(&self, invocation: ToolInvocation) -> ToolResult {
        match self.controller.upgrade() {
            Some(controller) => controller.handle_tool_invocation(invocation).await,
            None => ToolResult::failed(),
        }
    }

    async fn on_response_start(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_response_start().await;
        }
    }

    async fn on_response_end(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_response_end().await;
        }
    }

    async fn on_thread_change(&self, thread_id: Option<ThreadId>) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_thread_change(thread_id).await;
        }
    }

    async fn on_error(&self, error: String) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_widget_error(&error).await;
        }
    }

    async fn on_control_released(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_control_released().await;
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
