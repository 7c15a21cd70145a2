use super::*;
use widget_integration::{HeadlessWidgetRuntime, ScriptSignalBus};

const TIMEOUT: Duration = Duration::from_secs(5);

fn headless() -> Arc<HeadlessWidgetRuntime> {
    Arc::new(HeadlessWidgetRuntime::new())
}

#[tokio::test(start_paused = true)]
async fn registered_element_resolves_immediately() {
    let bus = ScriptSignalBus::new();
    let runtime = Arc::new(HeadlessWidgetRuntime::registered());
    let started = Instant::now();

    let mut monitor = ScriptReadinessMonitor::attach(runtime, &bus, TIMEOUT);

    assert_eq!(monitor.status(), ScriptStatus::Ready);
    assert!(!monitor.is_listening());
    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(monitor.resolve().await, ScriptEvent::Loaded);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn loaded_signal_settles_before_deadline_and_detaches() {
    let bus = ScriptSignalBus::new();
    let mut monitor = ScriptReadinessMonitor::attach(headless(), &bus, TIMEOUT);
    assert_eq!(bus.subscriber_count(), 1);

    bus.emit_loaded();
    let started = Instant::now();

    assert_eq!(monitor.resolve().await, ScriptEvent::Loaded);
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(monitor.status(), ScriptStatus::Ready);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failure_signal_carries_its_detail() {
    let bus = ScriptSignalBus::new();
    let mut monitor = ScriptReadinessMonitor::attach(headless(), &bus, TIMEOUT);

    bus.emit_failed("Failed to load ChatKit script from CDN");

    assert_eq!(
        monitor.resolve().await,
        ScriptEvent::Failed("Failed to load ChatKit script from CDN".to_string())
    );
    assert_eq!(monitor.status(), ScriptStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn silence_fails_at_the_deadline_never_before() {
    let bus = ScriptSignalBus::new();
    let started = Instant::now();
    let mut monitor = ScriptReadinessMonitor::attach(headless(), &bus, TIMEOUT);

    let event = monitor.resolve().await;

    assert_eq!(event, ScriptEvent::Failed(SCRIPT_UNAVAILABLE_REASON.to_string()));
    assert!(started.elapsed() >= TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn missed_load_signal_is_recovered_by_the_final_probe() {
    let bus = ScriptSignalBus::new();
    let runtime = headless();
    let mut monitor = ScriptReadinessMonitor::attach(runtime.clone(), &bus, TIMEOUT);

    // Registered without any signal reaching the monitor.
    runtime.register_element();
    let started = Instant::now();

    assert_eq!(monitor.resolve().await, ScriptEvent::Loaded);
    assert!(started.elapsed() >= TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn settled_monitor_is_inert() {
    let bus = ScriptSignalBus::new();
    let mut monitor = ScriptReadinessMonitor::attach(headless(), &bus, TIMEOUT);
    bus.emit_failed("boom");
    assert_eq!(monitor.resolve().await, ScriptEvent::Failed("boom".into()));

    // A late load signal has no listener and does not change the outcome.
    bus.emit_loaded();
    let started = Instant::now();
    assert_eq!(monitor.resolve().await, ScriptEvent::Failed("boom".into()));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(monitor.status(), ScriptStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn closed_notifier_leaves_only_the_deadline() {
    let bus = ScriptSignalBus::new();
    let mut monitor = ScriptReadinessMonitor::attach(headless(), &bus, TIMEOUT);
    drop(bus);

    let started = Instant::now();
    assert_eq!(
        monitor.resolve().await,
        ScriptEvent::Failed(SCRIPT_UNAVAILABLE_REASON.to_string())
    );
    assert!(started.elapsed() >= TIMEOUT);
}
