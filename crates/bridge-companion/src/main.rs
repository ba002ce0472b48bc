//! MacWin Bridge companion entry point.
//!
//! Binds the three session ports plus the discovery responder and serves
//! host sessions until Ctrl-C.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bridge_companion::application::session::{
    run_companion_session, CompanionDevices, CompanionListeners, CompanionSessionOptions,
    SessionTiming,
};
use bridge_companion::infrastructure::audio_output::{AudioSink, RecordingAudioSink};
use bridge_companion::infrastructure::display::{FrameSink, RecordingFrameSink};
use bridge_companion::infrastructure::input_injection::{InputInjector, RecordingInjector};
use bridge_net::discovery::DiscoveryResponder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "MacWin Bridge companion starting (v{})",
        env!("CARGO_PKG_VERSION")
    );

    let device_name = std::env::var("HOSTNAME").unwrap_or_else(|_| "mac-companion".to_string());

    // Answer discovery broadcasts for the lifetime of the process.
    let _responder = match DiscoveryResponder::start(device_name.clone()) {
        Ok(responder) => Some(responder),
        Err(e) => {
            warn!("discovery responder unavailable: {e}");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // One display; dimensions come from the platform in a full build.
    let (display_width, display_height, refresh_rate) = (2560, 1600, 60);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let listeners = match CompanionListeners::bind_default().await {
            Ok(listeners) => listeners,
            Err(e) => {
                error!("cannot bind session ports: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };

        let opts = CompanionSessionOptions {
            device_name: device_name.clone(),
            display_width,
            display_height,
            refresh_rate,
            timing: SessionTiming::default(),
        };

        match run_companion_session(
            opts,
            listeners,
            platform_devices(display_height),
            shutdown_rx.clone(),
        )
        .await
        {
            Ok(summary) => {
                info!(
                    "session {} ended ({:?}): {} frames, {} audio packets, {} inputs",
                    summary.session_id,
                    summary.reason,
                    summary.frames_presented,
                    summary.audio_packets_received,
                    summary.events_injected
                );
            }
            Err(e) => error!("session failed: {e}"),
        }
    }

    info!("MacWin Bridge companion stopped");
    Ok(())
}

/// Builds the platform sinks, degrading to recording fallbacks where a
/// backend is unavailable.
fn platform_devices(display_height: i32) -> CompanionDevices {
    #[cfg(target_os = "macos")]
    let injector: Arc<dyn InputInjector> = {
        use bridge_companion::infrastructure::input_injection::macos::CgEventInjector;
        match CgEventInjector::new(display_height) {
            Ok(injector) => Arc::new(injector),
            Err(e) => {
                warn!("input injection unavailable: {e}");
                Arc::new(RecordingInjector::default())
            }
        }
    };
    #[cfg(not(target_os = "macos"))]
    let injector: Arc<dyn InputInjector> = {
        let _ = display_height;
        warn!("input injection has no backend on this platform");
        Arc::new(RecordingInjector::default())
    };

    CompanionDevices {
        injector,
        frame_sink: Arc::new(RecordingFrameSink::default()) as Arc<dyn FrameSink>,
        audio_sink: Arc::new(RecordingAudioSink::default()) as Arc<dyn AudioSink>,
    }
}
