use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, load_settings_from, Settings},
    ControllerEvent, HttpSessionEndpoint, LoggingHost, SessionTokenProvider, WidgetController,
    WidgetView,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use widget_integration::{HeadlessWidgetRuntime, ScriptSignalBus};

#[derive(Parser, Debug)]
#[command(about = "Exercise the widget bootstrap against a live session endpoint")]
struct Cli {
    /// TOML settings file; defaults to widget.toml in the working directory.
    #[arg(long)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective settings after env overrides.
    Config,
    /// Request one client secret and print it masked.
    Session,
    /// Run a full bootstrap with a headless widget runtime.
    Run {
        /// Delay before the widget script announces itself.
        #[arg(long, default_value_t = 250)]
        script_delay_ms: u64,
        /// Report this script failure instead of loading.
        #[arg(long)]
        script_error: Option<String>,
        /// Never load the script; the readiness timeout decides.
        #[arg(long)]
        no_script: bool,
        /// Reset once if the first bootstrap is blocked.
        #[arg(long)]
        reset_on_error: bool,
        /// Print the recent state snapshots.
        #[arg(long)]
        trace: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Session => {
            let endpoint = Arc::new(HttpSessionEndpoint::from_settings(&settings)?);
            let provider = SessionTokenProvider::from_settings(&settings, endpoint);
            match provider.acquire(None).await {
                Ok(secret) => println!("client_secret={}", mask(secret.expose())),
                Err(err) => bail!("session failed: {}", err.user_message()),
            }
        }
        Command::Run {
            script_delay_ms,
            script_error,
            no_script,
            reset_on_error,
            trace,
        } => {
            let script = ScriptPlan {
                delay: Duration::from_millis(script_delay_ms),
                error: script_error,
                skip: no_script,
            };
            run(settings, script, reset_on_error, trace).await?;
        }
    }

    Ok(())
}

struct ScriptPlan {
    delay: Duration,
    error: Option<String>,
    skip: bool,
}

async fn run(settings: Settings, script: ScriptPlan, reset_on_error: bool, trace: bool) -> Result<()> {
    let wait_limit = settings.initializing_timeout() + Duration::from_secs(1);
    let runtime = Arc::new(HeadlessWidgetRuntime::new());
    let bus = Arc::new(ScriptSignalBus::new());
    let controller = WidgetController::new(
        settings,
        runtime.clone(),
        bus.clone(),
        Arc::new(LoggingHost),
    )?;
    let mut events = controller.subscribe_events();

    controller.mount().await;
    spawn_script(&runtime, &bus, &script);

    let mut view = wait_for_outcome(&controller, &mut events, wait_limit).await;
    if reset_on_error && matches!(view, WidgetView::Blocked { .. }) {
        warn!("probe: bootstrap blocked, resetting once");
        controller.reset().await;
        spawn_script(&runtime, &bus, &script);
        view = wait_for_outcome(&controller, &mut events, wait_limit).await;
    }

    println!("{}", serde_json::to_string_pretty(&view)?);
    if trace {
        println!("{}", serde_json::to_string_pretty(&controller.debug_trace().await)?);
    }
    controller.unmount().await;
    Ok(())
}

fn spawn_script(runtime: &Arc<HeadlessWidgetRuntime>, bus: &Arc<ScriptSignalBus>, script: &ScriptPlan) {
    if script.skip {
        return;
    }
    let runtime = Arc::clone(runtime);
    let bus = Arc::clone(bus);
    let delay = script.delay;
    let error = script.error.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match error {
            Some(detail) => bus.emit_failed(detail),
            None => runtime.load_script(&bus),
        }
    });
}

/// Waits for the first event that settles what the host would render.
async fn wait_for_outcome(
    controller: &Arc<WidgetController>,
    events: &mut tokio::sync::broadcast::Receiver<ControllerEvent>,
    limit: Duration,
) -> WidgetView {
    let outcome = tokio::time::timeout(limit, async {
        loop {
            match events.recv().await {
                Ok(
                    event @ (ControllerEvent::WidgetReady
                    | ControllerEvent::ScriptFailed(_)
                    | ControllerEvent::SessionFailed(_)
                    | ControllerEvent::ControlFailed(_)
                    | ControllerEvent::InitializingTimedOut),
                ) => return Some(event),
                Ok(event) => info!(?event, "probe: progress"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "probe: missed controller events"),
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match outcome {
        Ok(Some(event)) => info!(?event, "probe: bootstrap settled"),
        Ok(None) => warn!("probe: controller event stream closed"),
        Err(_) => warn!(?limit, "probe: gave up waiting for the bootstrap"),
    }
    controller.view().await
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(6).collect();
    format!("{visible}***")
}
