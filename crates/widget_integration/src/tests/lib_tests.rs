use super::*;
use std::sync::Mutex;

struct RecordingSecretSource {
    secret: String,
    requests: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl ClientSecretSource for RecordingSecretSource {
    async fn client_secret(&self, current: Option<String>) -> Result<String> {
        self.requests.lock().expect("requests").push(current);
        Ok(self.secret.clone())
    }
}

struct NoopHandler;

#[async_trait]
impl WidgetEventHandler for NoopHandler {
    async fn on_client_tool(&self, _invocation: ToolInvocation) -> ToolResult {
        ToolResult::failed()
    }
    async fn on_response_start(&self) {}
    async fn on_response_end(&self) {}
    async fn on_thread_change(&self, _thread_id: Option<ThreadId>) {}
    async fn on_error(&self, _error: String) {}
    async fn on_control_released(&self) {}
}

fn config_with(source: Arc<RecordingSecretSource>) -> Arc<WidgetConfig> {
    Arc::new(WidgetConfig {
        api: source,
        handler: Arc::new(NoopHandler),
        theme: ThemeOptions {
            color_scheme: ColorScheme::Dark,
            accent_color: None,
        },
        start_screen: StartScreenOptions {
            greeting: "hi".to_string(),
            prompts: Vec::new(),
        },
        composer: ComposerOptions {
            placeholder: "ask".to_string(),
            attachments_enabled: true,
        },
        thread_item_feedback: false,
    })
}

#[tokio::test]
async fn bus_delivers_signals_to_every_subscriber() {
    let bus = ScriptSignalBus::new();
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    bus.emit_failed("cdn unreachable");

    let expected = ScriptSignal::Failed {
        detail: "cdn unreachable".to_string(),
    };
    assert_eq!(first.recv().await.expect("first"), expected);
    assert_eq!(second.recv().await.expect("second"), expected);
}

#[test]
fn dropping_a_receiver_unsubscribes() {
    let bus = ScriptSignalBus::new();
    let rx = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 1);
    drop(rx);
    assert_eq!(bus.subscriber_count(), 0);
    bus.emit_loaded();
}

#[tokio::test]
async fn headless_runtime_requests_secret_through_config() {
    let runtime = HeadlessWidgetRuntime::registered();
    let source = Arc::new(RecordingSecretSource {
        secret: "cs_live".to_string(),
        requests: Mutex::new(Vec::new()),
    });

    let control = runtime
        .obtain_control(config_with(source.clone()))
        .await
        .expect("control");

    assert_eq!(control.describe(), "headless-control#1");
    assert_eq!(*source.requests.lock().expect("requests"), vec![None]);
    assert_eq!(runtime.instances_created(), 1);
}

#[tokio::test]
async fn headless_runtime_refuses_control_before_registration() {
    let runtime = HeadlessWidgetRuntime::new();
    assert!(!runtime.is_element_registered(WIDGET_ELEMENT_NAME));

    let source = Arc::new(RecordingSecretSource {
        secret: "cs_live".to_string(),
        requests: Mutex::new(Vec::new()),
    });
    let err = runtime
        .obtain_control(config_with(source.clone()))
        .await
        .err()
        .expect("unregistered runtime must fail");

    assert!(err.to_string().contains("not registered"));
    assert!(source.requests.lock().expect("requests").is_empty());
}

#[tokio::test]
async fn load_script_registers_and_announces() {
    let bus = ScriptSignalBus::new();
    let mut rx = bus.subscribe();
    let runtime = HeadlessWidgetRuntime::new();

    runtime.load_script(&bus);

    assert!(runtime.is_element_registered(WIDGET_ELEMENT_NAME));
    assert!(!runtime.is_element_registered("some-other-element"));
    assert_eq!(rx.recv().await.expect("signal"), ScriptSignal::Loaded);
}
