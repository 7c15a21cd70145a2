use std::sync::Arc;

use shared::domain::ScriptStatus;
use tracing::info;

use crate::{
    controller::{ControllerState, SessionState, WidgetController},
    error_state::ErrorState,
    ControllerEvent,
};

impl ControllerState {
    /// Cancels this generation's tasks and returns every derived field to its
    /// initial value. The debug trace is kept.
    pub(crate) fn discard_derived_state(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.generation += 1;
        self.script_status = ScriptStatus::Pending;
        self.session = SessionState::Idle;
        self.errors = ErrorState::default();
        self.control = None;
        self.control_requested = false;
        self.has_ever_initialized = false;
        self.is_initializing_session = true;
        self.facts.clear();
    }
}

impl WidgetController {
    /// Discards all derived state and bootstraps again from scratch. The
    /// widget configuration object is reused.
    pub async fn reset(self: &Arc<Self>) {
        let mut guard = self.inner.lock().await;
        if !guard.mounted {
            info!("controller: reset ignored while unmounted");
            return;
        }

        guard.discard_derived_state();
        info!(generation = guard.generation, "controller: reset");
        guard.record("reset");
        let _ = self.events.send(ControllerEvent::Reset);

        self.begin_bootstrap(&mut guard);
        drop(guard);
        self.notify_session_changed();
    }
}
