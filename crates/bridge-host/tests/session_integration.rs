//! Full host ↔ companion sessions over loopback: discovery of nothing,
//! connect + handshake, streaming with the static-frame skip, and
//! teardown when the peer goes away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_companion::application::session::{
    run_companion_session, CompanionDevices, CompanionListeners, CompanionSessionOptions,
    EndReason as CompanionEndReason, SessionTiming as CompanionTiming,
};
use bridge_companion::infrastructure::audio_output::RecordingAudioSink;
use bridge_companion::infrastructure::display::RecordingFrameSink;
use bridge_companion::infrastructure::input_injection::RecordingInjector;
use bridge_core::buffer::BufferPool;
use bridge_core::protocol::message::ChannelPorts;
use bridge_host::application::session::{
    run_host_session, EndReason, HostDevices, HostSessionOptions, SessionError, SessionTiming,
};
use bridge_host::infrastructure::audio_capture::{
    AudioFormat, AudioSource, PcmBlock, SampleFormat, ScriptedAudioSource,
};
use bridge_host::infrastructure::input_hook::mock::MockInputHook;
use bridge_host::infrastructure::input_hook::{CursorController, RecordingCursorController};
use bridge_host::infrastructure::screen_capture::{ScreenSource, TestPatternSource};
use bridge_host::infrastructure::storage::config::AppConfig;
use tokio::sync::watch;

fn short_timing() -> SessionTiming {
    SessionTiming {
        heartbeat_interval: Duration::from_millis(200),
        heartbeat_timeout: Duration::from_millis(600),
        handshake_timeout: Duration::from_secs(2),
    }
}

fn companion_setup(
    ports: ChannelPorts,
) -> (
    tokio::task::JoinHandle<
        Result<
            bridge_companion::application::session::CompanionSummary,
            bridge_companion::application::session::CompanionSessionError,
        >,
    >,
    Arc<RecordingFrameSink>,
    watch::Sender<bool>,
    ChannelPorts,
) {
    let frames = Arc::new(RecordingFrameSink::default());
    let devices = CompanionDevices {
        injector: Arc::new(RecordingInjector::default()),
        frame_sink: Arc::clone(&frames) as _,
        audio_sink: Arc::new(RecordingAudioSink::default()),
    };
    let opts = CompanionSessionOptions {
        device_name: "itest-companion".to_string(),
        display_width: 2560,
        display_height: 1600,
        refresh_rate: 60,
        timing: CompanionTiming {
            heartbeat_interval: Duration::from_millis(200),
            heartbeat_timeout: Duration::from_millis(600),
            handshake_timeout: Duration::from_secs(2),
        },
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (ports_tx, ports_rx) = std::sync::mpsc::channel();
    let handle = tokio::spawn(async move {
        let listeners = CompanionListeners::bind("127.0.0.1".parse().unwrap(), ports)
            .await
            .expect("companion bind");
        ports_tx.send(listeners.ports()).unwrap();
        run_companion_session(opts, listeners, devices, shutdown_rx).await
    });
    let actual_ports = ports_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("companion ports");
    (handle, frames, shutdown_tx, actual_ports)
}

fn host_options(ports: ChannelPorts) -> HostSessionOptions {
    let mut config = AppConfig::default();
    config.connection.companion_host = Some("127.0.0.1".to_string());
    config.connection.connect_attempts = 3;
    config.connection.connect_retry_ms = 200;
    HostSessionOptions {
        config,
        device_name: "itest-host".to_string(),
        display_width: 1920,
        display_height: 1080,
        refresh_rate: 60,
        ports,
        timing: short_timing(),
    }
}

fn host_devices(screen: Option<Box<dyn ScreenSource>>) -> HostDevices {
    let (hook, _driver) = MockInputHook::new();
    HostDevices {
        screen,
        audio: Some(Box::new(ScriptedAudioSource::new(
            AudioFormat {
                sample_rate: 48_000,
                channels: 2,
                format: SampleFormat::F32,
            },
            vec![PcmBlock::F32(vec![0.3; 96])],
        )) as Box<dyn AudioSource>),
        hook: Box::new(hook),
        cursor: RecordingCursorController::new() as Arc<dyn CursorController>,
    }
}

/// Spec scenario 1 + 3: connect, handshake, stream the same static frame
/// twice. Exactly one `VideoFrame` (the keyframe) crosses; the second
/// capture is skipped. Clean shutdown afterwards.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_handshake_stream_and_shutdown() {
    let ephemeral = ChannelPorts {
        control: 0,
        video: 0,
        audio: 0,
    };
    let (companion, frames, _companion_shutdown, ports) = companion_setup(ephemeral);

    let pool = BufferPool::new();
    let static_frame = vec![0x33u8; 1920 * 4 * 2]; // 1920x2 strip keeps it fast
    let screen = TestPatternSource::from_frames(
        Arc::clone(&pool),
        1920,
        2,
        vec![static_frame.clone(), static_frame.clone()],
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let host = tokio::spawn(run_host_session(
        host_options(ports),
        host_devices(Some(Box::new(screen))),
        shutdown_rx,
    ));

    // Let the stream run, then ask the host to stop.
    let deadline = Instant::now() + Duration::from_secs(3);
    while frames.raw_count() < 1 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(frames.raw_count(), 1, "only the keyframe is presented");
    // Let the identical second capture reach the worker and be skipped.
    tokio::time::sleep(Duration::from_millis(200)).await;

    shutdown_tx.send(true).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(3), host)
        .await
        .expect("host ends")
        .unwrap()
        .expect("host summary");
    assert_eq!(summary.reason, EndReason::ShutdownRequested);
    assert_eq!(summary.frames_sent, 1);
    assert_eq!(summary.frames_skipped, 1);
    assert!(summary.audio_packets_sent >= 1);

    // The companion sees the Disconnect that closed the session.
    let companion_summary = tokio::time::timeout(Duration::from_secs(3), companion)
        .await
        .expect("companion ends")
        .unwrap()
        .expect("companion summary");
    assert!(matches!(
        companion_summary.reason,
        CompanionEndReason::PeerDisconnected | CompanionEndReason::ChannelLost(_)
    ));
    assert_eq!(companion_summary.frames_presented, 1);
}

/// Spec scenario 6: killing the companion mid-stream tears the host
/// session down within a second.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_host_teardown_on_companion_loss() {
    let ephemeral = ChannelPorts {
        control: 0,
        video: 0,
        audio: 0,
    };
    let (companion, _frames, _companion_shutdown, ports) = companion_setup(ephemeral);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let host = tokio::spawn(run_host_session(
        host_options(ports),
        host_devices(None),
        shutdown_rx,
    ));

    // Wait until streaming is established (companion handshook).
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Kill the companion: its transports drop with the task.
    companion.abort();
    let start = Instant::now();

    let summary = tokio::time::timeout(Duration::from_secs(1), host)
        .await
        .expect("host tears down within a second")
        .unwrap()
        .expect("clean end");
    assert!(matches!(
        summary.reason,
        EndReason::ChannelLost(_) | EndReason::PeerDisconnected
    ));
    assert!(start.elapsed() < Duration::from_secs(1));
}

/// Without a companion anywhere, session setup fails cleanly with a
/// connect error instead of hanging.
#[tokio::test]
async fn test_connect_failure_without_companion() {
    let mut opts = host_options(ChannelPorts {
        control: 1,
        video: 1,
        audio: 1,
    });
    opts.config.connection.connect_attempts = 1;
    opts.config.connection.connect_retry_ms = 100;

    let (_tx, shutdown_rx) = watch::channel(false);
    let result = run_host_session(opts, host_devices(None), shutdown_rx).await;
    assert!(matches!(result, Err(SessionError::Transport(_))));
}
