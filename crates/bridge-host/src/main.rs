//! MacWin Bridge host entry point.
//!
//! Wires the platform devices to the session orchestrator and runs
//! sessions until Ctrl-C:
//!
//! ```text
//! main()
//!  └─ load config (JSON, per-user location)
//!  └─ run_host_session()
//!       ├─ discovery (UDP broadcast)
//!       ├─ control/video/audio transports
//!       ├─ capture threads + pipelines
//!       └─ KVM service (hook thread)
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bridge_host::application::session::{
    run_host_session, ChannelPorts, HostDevices, HostSessionOptions, SessionError, SessionTiming,
};
use bridge_host::infrastructure::input_hook::{CursorController, InputHook};
use bridge_host::infrastructure::storage::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging; level overridden by RUST_LOG.
    let cfg = config::load_config().unwrap_or_else(|e| {
        eprintln!("config load failed, using defaults: {e}");
        Default::default()
    });
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone())),
        )
        .init();

    info!("MacWin Bridge host starting (v{})", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let device_name = std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "windows-host".to_string());

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let opts = HostSessionOptions {
            config: cfg.clone(),
            device_name: device_name.clone(),
            display_width: 1920,
            display_height: 1080,
            refresh_rate: 60,
            ports: ChannelPorts::default(),
            timing: SessionTiming::default(),
        };

        match run_host_session(opts, platform_devices(&cfg), shutdown_rx.clone()).await {
            Ok(summary) => {
                info!(
                    "session {} ended ({:?}): {} frames sent, {} skipped, {} audio packets",
                    summary.session_id,
                    summary.reason,
                    summary.frames_sent,
                    summary.frames_skipped,
                    summary.audio_packets_sent
                );
            }
            Err(SessionError::CompanionNotFound) => {
                info!("no companion on the network; retrying");
            }
            Err(e) => {
                error!("session failed: {e}");
            }
        }

        // Back off before the next attempt so a dead companion does not
        // turn this loop into a broadcast storm.
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }

    info!("MacWin Bridge host stopped");
    Ok(())
}

/// Builds the platform device set. Components whose backend is
/// unavailable degrade to disabled pipelines rather than failing the
/// whole application.
fn platform_devices(cfg: &config::AppConfig) -> HostDevices {
    #[cfg(target_os = "windows")]
    let screen = {
        use bridge_host::infrastructure::screen_capture::{windows::DxgiScreenSource, ScreenSource};
        match DxgiScreenSource::open(cfg.video.monitor_index) {
            Ok(source) => Some(Box::new(source) as Box<dyn ScreenSource>),
            Err(e) => {
                warn!("screen capture unavailable: {e}");
                None
            }
        }
    };
    #[cfg(not(target_os = "windows"))]
    let screen = {
        let _ = cfg;
        warn!("screen capture has no backend on this platform");
        None
    };

    #[cfg(target_os = "windows")]
    let audio = {
        use bridge_host::infrastructure::audio_capture::{
            windows::WasapiLoopbackSource, AudioSource,
        };
        match WasapiLoopbackSource::open() {
            Ok(source) => Some(Box::new(source) as Box<dyn AudioSource>),
            Err(e) => {
                warn!("audio capture unavailable: {e}");
                None
            }
        }
    };
    #[cfg(not(target_os = "windows"))]
    let audio = {
        warn!("audio capture has no backend on this platform");
        None
    };

    #[cfg(target_os = "windows")]
    let (hook, cursor): (Box<dyn InputHook>, Arc<dyn CursorController>) = {
        use bridge_host::infrastructure::input_hook::windows::{
            WindowsCursorController, WindowsInputHook,
        };
        (
            Box::new(WindowsInputHook::new()),
            Arc::new(WindowsCursorController),
        )
    };
    #[cfg(not(target_os = "windows"))]
    let (hook, cursor): (Box<dyn InputHook>, Arc<dyn CursorController>) = {
        use bridge_host::infrastructure::input_hook::{
            mock::MockInputHook, RecordingCursorController,
        };
        warn!("input hook has no backend on this platform; KVM runs inert");
        let (hook, _driver) = MockInputHook::new();
        (Box::new(hook), RecordingCursorController::new())
    };

    HostDevices {
        screen,
        audio,
        hook,
        cursor,
    }
}
