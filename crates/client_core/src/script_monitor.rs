//! Watches for the widget runtime script: an immediate registration probe,
//! then load/failure signals raced against a deadline with one final probe.

use std::{sync::Arc, time::Duration};

use shared::domain::ScriptStatus;
use tokio::time::{sleep_until, Instant};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, info, warn};
use widget_integration::{ScriptSignal, ScriptSignalNotifier, WidgetRuntime, WIDGET_ELEMENT_NAME};

pub const SCRIPT_UNAVAILABLE_REASON: &str = "widget runtime unavailable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    Loaded,
    Failed(String),
}

pub struct ScriptReadinessMonitor {
    runtime: Arc<dyn WidgetRuntime>,
    signals: Option<BroadcastStream<ScriptSignal>>,
    deadline: Instant,
    status: ScriptStatus,
    failure: Option<String>,
}

impl ScriptReadinessMonitor {
    /// Subscribes before returning so a signal emitted right after attach is not lost.
    pub fn attach(
        runtime: Arc<dyn WidgetRuntime>,
        notifier: &dyn ScriptSignalNotifier,
        timeout: Duration,
    ) -> Self {
        let deadline = Instant::now() + timeout;
        if runtime.is_element_registered(WIDGET_ELEMENT_NAME) {
            debug!("script monitor: {WIDGET_ELEMENT_NAME} already registered");
            return Self {
                runtime,
                signals: None,
                deadline,
                status: ScriptStatus::Ready,
                failure: None,
            };
        }

        debug!(?timeout, "script monitor: waiting for widget script");
        Self {
            runtime,
            signals: Some(BroadcastStream::new(notifier.subscribe())),
            deadline,
            status: ScriptStatus::Pending,
            failure: None,
        }
    }

    pub fn status(&self) -> ScriptStatus {
        self.status
    }

    pub fn is_listening(&self) -> bool {
        self.signals.is_some()
    }

    /// Settles the monitor. Once settled it never re-arms; later calls replay the outcome.
    pub async fn resolve(&mut self) -> ScriptEvent {
        match self.status {
            ScriptStatus::Ready => return ScriptEvent::Loaded,
            ScriptStatus::Error => {
                return ScriptEvent::Failed(
                    self.failure
                        .clone()
                        .unwrap_or_else(|| SCRIPT_UNAVAILABLE_REASON.to_string()),
                )
            }
            ScriptStatus::Pending => {}
        }

        let runtime = Arc::clone(&self.runtime);
        let deadline = self.deadline;
        let event = tokio::select! {
            signal = next_signal(&mut self.signals) => match signal {
                ScriptSignal::Loaded => ScriptEvent::Loaded,
                ScriptSignal::Failed { detail } => ScriptEvent::Failed(detail),
            },
            _ = sleep_until(deadline) => {
                if runtime.is_element_registered(WIDGET_ELEMENT_NAME) {
                    info!("script monitor: load signal missed but element is registered");
                    ScriptEvent::Loaded
                } else {
                    warn!("script monitor: timed out waiting for {WIDGET_ELEMENT_NAME}");
                    ScriptEvent::Failed(SCRIPT_UNAVAILABLE_REASON.to_string())
                }
            }
        };

        self.settle(&event);
        event
    }

    fn settle(&mut self, event: &ScriptEvent) {
        self.signals = None;
        match event {
            ScriptEvent::Loaded => {
                self.status = ScriptStatus::Ready;
                self.failure = None;
            }
            ScriptEvent::Failed(detail) => {
                self.status = ScriptStatus::Error;
                self.failure = Some(detail.clone());
            }
        }
    }
}

async fn next_signal(signals: &mut Option<BroadcastStream<ScriptSignal>>) -> ScriptSignal {
    if let Some(stream) = signals.as_mut() {
        while let Some(item) = stream.next().await {
            match item {
                Ok(signal) => return signal,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "script monitor: lagged behind script signals");
                }
            }
        }
        debug!("script monitor: signal channel closed");
    }
    // Only the deadline can settle the monitor now.
    std::future::pending().await
}

#[cfg(test)]
#[path = "tests/script_monitor_tests.rs"]
mod tests;
