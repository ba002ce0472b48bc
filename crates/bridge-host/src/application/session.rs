//! Session orchestration for the host.
//!
//! ```text
//! Idle → Discovering → Connecting → Handshaking → Streaming → TearingDown → Idle
//!            ↓             ↓            ↓            ↓
//!            └─────────────┴────────────┴────────────┴──→ TearingDown (any failure)
//! ```
//!
//! A session exists only while all three channels are attached and the
//! handshake is done. The first disconnect, I/O error, protocol violation,
//! or heartbeat starvation on *any* channel tears everything down:
//! KVM first (the cursor must never stay imprisoned), then video, then
//! audio, and the control channel last so the companion still sees the
//! `Disconnect`.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bridge_core::buffer::BufferPool;
use bridge_core::kvm::focus::FocusTracker;
use bridge_core::protocol::handshake::{
    AudioConfig, DisplayMode, DisplaySwitch, HandshakeInfo, KvmConfig as KvmConfigDoc, Platform,
    VideoConfig,
};
use bridge_core::protocol::input::CursorReturnPayload;
use bridge_core::protocol::message::{Channel, MessageFlags, MessageType};
use bridge_core::Rect;
use bridge_net::discovery;
use bridge_net::transport::{MessageStream, Transport, TransportError};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::kvm::{InputLink, KvmService};
use crate::application::stream_audio::{AudioLink, AudioPipeline};
use crate::application::stream_video::{spawn_capture_thread, FrameLink, VideoPipeline};
use crate::infrastructure::audio_capture::AudioSource;
use crate::infrastructure::input_hook::{CursorController, InputHook, KvmError};
use crate::infrastructure::screen_capture::ScreenSource;
use crate::infrastructure::storage::config::AppConfig;

/// Orchestrator phases, used in logs and protocol-violation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Discovering,
    Connecting,
    Handshaking,
    Streaming,
    TearingDown,
}

/// Why a session ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The companion sent `Disconnect`.
    PeerDisconnected,
    /// A channel dropped or errored.
    ChannelLost(Channel),
    /// Three heartbeat intervals passed without a peer heartbeat.
    HeartbeatTimeout,
    /// The local user asked to stop.
    ShutdownRequested,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake JSON malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handshake timed out")]
    Timeout,

    #[error("peer incompatible: {0}")]
    Incompatible(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no companion found on the network")]
    CompanionNotFound,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol violation: unexpected {got:?} during {state:?}")]
    ProtocolViolation {
        state: SessionState,
        got: MessageType,
    },

    #[error("KVM startup failed: {0}")]
    Kvm(#[from] KvmError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Timeouts and intervals, overridable by tests.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    pub heartbeat_interval: Duration,
    /// Teardown threshold: three missed heartbeats at the default interval.
    pub heartbeat_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

pub use bridge_core::protocol::message::ChannelPorts;

/// Everything the host session needs from the outside.
pub struct HostSessionOptions {
    pub config: AppConfig,
    pub device_name: String,
    pub display_width: i32,
    pub display_height: i32,
    pub refresh_rate: i32,
    pub ports: ChannelPorts,
    pub timing: SessionTiming,
}

/// Platform devices injected at session start.
pub struct HostDevices {
    /// `None` disables the video pipeline (audio + KVM still run).
    pub screen: Option<Box<dyn ScreenSource>>,
    /// `None` disables the audio pipeline (logged; session continues).
    pub audio: Option<Box<dyn AudioSource>>,
    pub hook: Box<dyn InputHook>,
    pub cursor: Arc<dyn CursorController>,
}

/// Counters reported after teardown.
#[derive(Debug)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub reason: EndReason,
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub audio_packets_sent: u64,
}

/// Runs one complete host session: discover, connect, handshake, stream,
/// tear down. Returns when the session ends for any reason.
///
/// # Errors
///
/// [`SessionError`] for failures before or during streaming; a clean end
/// (peer disconnect, shutdown request, channel loss) is an `Ok` summary.
pub async fn run_host_session(
    opts: HostSessionOptions,
    devices: HostDevices,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SessionSummary, SessionError> {
    let session_id = Uuid::new_v4();
    let cfg = opts.config.clone();

    // ── Discovering ───────────────────────────────────────────────────────────
    info!(%session_id, "session: discovering companion");
    let companion_ip = resolve_companion(&cfg).await?;

    // ── Connecting: Control, Video, Audio, in that order ──────────────────────
    info!(%session_id, "session: connecting to {companion_ip}");
    let attempts = cfg.connection.connect_attempts.max(1);
    let delay = Duration::from_millis(cfg.connection.connect_retry_ms);

    let control = Transport::connect_with_retry(
        SocketAddr::from((companion_ip, opts.ports.control)),
        Channel::Control,
        attempts,
        delay,
    )
    .await?;

    let video = match Transport::connect_with_retry(
        SocketAddr::from((companion_ip, opts.ports.video)),
        Channel::Video,
        attempts,
        delay,
    )
    .await
    {
        Ok(t) => t,
        Err(e) => {
            // Close the channel that did open before surfacing the error.
            drop(control);
            return Err(e.into());
        }
    };

    let audio = match Transport::connect_with_retry(
        SocketAddr::from((companion_ip, opts.ports.audio)),
        Channel::Audio,
        attempts,
        delay,
    )
    .await
    {
        Ok(t) => t,
        Err(e) => {
            drop(control);
            drop(video);
            return Err(e.into());
        }
    };

    // ── Handshaking ───────────────────────────────────────────────────────────
    info!(%session_id, "session: handshaking");
    let mut control_messages = control.messages();
    let hello = HandshakeInfo {
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        device_name: opts.device_name.clone(),
        platform: Platform::Windows,
        display_width: opts.display_width,
        display_height: opts.display_height,
        refresh_rate: opts.refresh_rate,
        supports_audio: true,
        supports_input: true,
    };
    control
        .send(MessageType::Handshake, MessageFlags::NONE, &hello.to_json())
        .await?;

    let ack = match tokio::time::timeout(
        opts.timing.handshake_timeout,
        wait_for_handshake_ack(&mut control_messages),
    )
    .await
    {
        Ok(result) => result?,
        Err(_elapsed) => return Err(HandshakeError::Timeout.into()),
    };
    check_compatibility(&hello, &ack)?;
    info!(
        %session_id,
        "session: companion is {} ({}x{})",
        ack.device_name, ack.display_width, ack.display_height
    );

    // ── Streaming ─────────────────────────────────────────────────────────────
    let control = Arc::new(control);
    let video_transport = Arc::new(video);
    let audio_transport = Arc::new(audio);
    let pool = BufferPool::new();
    let running = Arc::new(AtomicBool::new(true));

    // Announce stream parameters.
    let video_config = VideoConfig {
        codec: cfg.video.codec,
        width: opts.display_width,
        height: opts.display_height,
        target_fps: cfg.video.target_fps,
    };
    video_transport
        .send(
            MessageType::VideoConfig,
            MessageFlags::NONE,
            &video_config.to_json(),
        )
        .await?;

    let audio_config = AudioConfig {
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
        bits_per_sample: cfg.audio.bits_per_sample,
        buffer_ms: cfg.audio.buffer_ms,
    };
    audio_transport
        .send(
            MessageType::AudioConfig,
            MessageFlags::NONE,
            &audio_config.to_json(),
        )
        .await?;

    let kvm_config = KvmConfigDoc {
        edge: cfg.kvm.edge,
        dead_zone_px: cfg.kvm.dead_zone_px,
        edge_offset: cfg.kvm.edge_offset,
    };
    control
        .send(
            MessageType::KvmConfig,
            MessageFlags::NONE,
            &serde_json::to_vec(&kvm_config).unwrap_or_default(),
        )
        .await?;

    // Audio pipeline runs whenever a session exists.
    let audio_pipeline = match devices.audio {
        Some(source) => Some(AudioPipeline::start(
            source,
            Arc::clone(&audio_transport) as Arc<dyn AudioLink>,
            audio_config,
        )),
        None => {
            warn!(%session_id, "no audio source; audio pipeline disabled");
            None
        }
    };

    // KVM service.
    let tracker = FocusTracker::new(
        Rect::from_size(opts.display_width, opts.display_height),
        Rect::from_size(ack.display_width, ack.display_height),
        cfg.kvm.edge,
        cfg.kvm.dead_zone_px,
    )
    .map_err(|e| SessionError::Config(e.to_string()))?;
    let kvm = KvmService::start(
        devices.hook,
        devices.cursor,
        Arc::clone(&control) as Arc<dyn InputLink>,
        tracker,
        cfg.kvm.hotkey_vk,
    )?;

    // Video pipeline only when we are the screen source. The raw-BGRA
    // worker is built in; an encoded codec needs the platform encoder
    // backend, without which the video pipeline (and only it) stays down.
    let mut video_pipeline = None;
    let mut capture_thread = None;
    if cfg.video.codec.is_encoded() {
        warn!(
            %session_id,
            "codec {:?} requires the platform encoder backend; video disabled",
            cfg.video.codec
        );
    } else if cfg.video.display_mode == DisplayMode::HostToCompanion {
        if let Some(screen) = devices.screen {
            let pipeline = Arc::new(VideoPipeline::start(
                Arc::clone(&video_transport) as Arc<dyn FrameLink>,
                Arc::clone(&pool),
            ));
            capture_thread = Some(spawn_capture_thread(
                screen,
                Arc::clone(&pipeline),
                cfg.video.target_fps,
                Arc::clone(&running),
            ));
            video_pipeline = Some(pipeline);
        } else {
            warn!(%session_id, "display mode streams to companion but no screen source");
        }
    }

    // Watch the video/audio channels: loss of either ends the session.
    let (down_tx, mut down_rx) = mpsc::channel::<Channel>(3);
    spawn_channel_watch(video_transport.messages(), Channel::Video, down_tx.clone());
    spawn_channel_watch(audio_transport.messages(), Channel::Audio, down_tx.clone());

    // Heartbeat exchange.
    let last_peer_heartbeat = Arc::new(Mutex::new(Instant::now()));
    let heartbeat_control = Arc::clone(&control);
    let heartbeat_interval = opts.timing.heartbeat_interval;
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if heartbeat_control
                .send(MessageType::Heartbeat, MessageFlags::NONE, &[])
                .await
                .is_err()
            {
                break;
            }
        }
    });

    info!(%session_id, "session: streaming");
    let outcome = streaming_loop(
        &mut control_messages,
        &mut down_rx,
        &mut shutdown,
        &kvm,
        video_pipeline.as_deref(),
        &last_peer_heartbeat,
        &opts.timing,
    )
    .await;

    // A channel that died of protocol corruption is a violation, not a
    // clean loss; surface the framing fault instead.
    let outcome = match outcome {
        Ok(reason @ EndReason::ChannelLost(_)) => {
            match control
                .fault()
                .or_else(|| video_transport.fault())
                .or_else(|| audio_transport.fault())
            {
                Some(fault) => Err(fault.into()),
                None => Ok(reason),
            }
        }
        other => other,
    };

    // ── TearingDown ───────────────────────────────────────────────────────────
    info!(%session_id, "session: tearing down ({outcome:?})");
    running.store(false, Ordering::Relaxed);
    heartbeat_task.abort();

    // KVM first so the cursor is released, then video, then audio.
    kvm.stop();
    drop(kvm);
    if let Some(pipeline) = &video_pipeline {
        pipeline.stop();
    }
    if let Some(handle) = capture_thread {
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }
    let frames_sent;
    let frames_skipped;
    match &video_pipeline {
        Some(p) => {
            frames_sent = p.stats().frames_sent();
            frames_skipped = p.stats().frames_skipped();
        }
        None => {
            frames_sent = 0;
            frames_skipped = 0;
        }
    }
    drop(video_pipeline);

    let audio_packets_sent = match &audio_pipeline {
        Some(p) => {
            p.stop();
            p.stats().packets_sent()
        }
        None => 0,
    };
    drop(audio_pipeline);

    // Close data channels, then say goodbye on control and close it last.
    drop(video_transport);
    drop(audio_transport);
    let _ = tokio::time::timeout(
        Duration::from_millis(250),
        control.send(MessageType::Disconnect, MessageFlags::NONE, &[]),
    )
    .await;
    drop(control);

    let reason = outcome?;
    Ok(SessionSummary {
        session_id,
        reason,
        frames_sent,
        frames_skipped,
        audio_packets_sent,
    })
}

// ── Pieces ────────────────────────────────────────────────────────────────────

async fn resolve_companion(cfg: &AppConfig) -> Result<IpAddr, SessionError> {
    if let Some(host) = &cfg.connection.companion_host {
        return host
            .parse()
            .map_err(|_| SessionError::Config(format!("bad companion host: {host}")));
    }
    let timeout = Duration::from_millis(cfg.connection.discovery_timeout_ms);
    let found = tokio::task::spawn_blocking(move || {
        discovery::discover(timeout, discovery::DEFAULT_ATTEMPTS)
    })
    .await
    .map_err(|e| SessionError::Config(e.to_string()))?
    .map_err(|e| SessionError::Config(e.to_string()))?;

    match found {
        Some(peer) => {
            info!(
                "discovered companion {} at {}",
                peer.machine_name.as_deref().unwrap_or("<unnamed>"),
                peer.addr
            );
            Ok(peer.addr)
        }
        None => Err(SessionError::CompanionNotFound),
    }
}

async fn wait_for_handshake_ack(
    messages: &mut MessageStream,
) -> Result<HandshakeInfo, SessionError> {
    match messages.next().await {
        Some((header, payload)) if header.msg_type == MessageType::HandshakeAck => {
            Ok(HandshakeInfo::from_json(&payload).map_err(HandshakeError::Json)?)
        }
        Some((header, _)) => Err(SessionError::ProtocolViolation {
            state: SessionState::Handshaking,
            got: header.msg_type,
        }),
        None => Err(TransportError::NotConnected.into()),
    }
}

fn check_compatibility(ours: &HandshakeInfo, theirs: &HandshakeInfo) -> Result<(), HandshakeError> {
    let major = |v: &str| v.split('.').next().unwrap_or("").to_string();
    if major(&ours.app_version) != major(&theirs.app_version) {
        return Err(HandshakeError::Incompatible(format!(
            "version {} vs {}",
            ours.app_version, theirs.app_version
        )));
    }
    if theirs.display_width <= 0 || theirs.display_height <= 0 {
        return Err(HandshakeError::Incompatible(format!(
            "bad display {}x{}",
            theirs.display_width, theirs.display_height
        )));
    }
    Ok(())
}

fn spawn_channel_watch(mut stream: MessageStream, channel: Channel, down: mpsc::Sender<Channel>) {
    tokio::spawn(async move {
        while let Some((header, _payload)) = stream.next().await {
            // Nothing is expected from the companion on these channels in
            // the host-to-companion direction; log and move on.
            debug!("{channel}: unexpected inbound {:?}", header.msg_type);
        }
        let _ = down.send(channel).await;
    });
}

async fn streaming_loop(
    control_messages: &mut MessageStream,
    down_rx: &mut mpsc::Receiver<Channel>,
    shutdown: &mut watch::Receiver<bool>,
    kvm: &KvmService,
    video_pipeline: Option<&VideoPipeline>,
    last_peer_heartbeat: &Arc<Mutex<Instant>>,
    timing: &SessionTiming,
) -> Result<EndReason, SessionError> {
    let mut starvation_check = tokio::time::interval(timing.heartbeat_interval / 3);
    starvation_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(EndReason::ShutdownRequested);
                }
            }
            lost = down_rx.recv() => {
                if let Some(channel) = lost {
                    return Ok(EndReason::ChannelLost(channel));
                }
            }
            _ = starvation_check.tick() => {
                let last = *last_peer_heartbeat.lock().unwrap_or_else(|e| e.into_inner());
                if last.elapsed() > timing.heartbeat_timeout {
                    warn!("heartbeat starvation: peer silent for {:?}", last.elapsed());
                    return Ok(EndReason::HeartbeatTimeout);
                }
            }
            msg = control_messages.next() => {
                let (header, payload) = match msg {
                    Some(m) => m,
                    None => return Ok(EndReason::ChannelLost(Channel::Control)),
                };
                match handle_control_message(header.msg_type, &payload, kvm, video_pipeline, last_peer_heartbeat)? {
                    Some(reason) => return Ok(reason),
                    None => {}
                }
            }
        }
    }
}

/// Routes one control-channel message during streaming. `Ok(Some(_))`
/// finishes the session cleanly; an `Err` is session-fatal.
fn handle_control_message(
    msg_type: MessageType,
    payload: &Bytes,
    kvm: &KvmService,
    video_pipeline: Option<&VideoPipeline>,
    last_peer_heartbeat: &Arc<Mutex<Instant>>,
) -> Result<Option<EndReason>, SessionError> {
    match msg_type {
        MessageType::Heartbeat => {
            *last_peer_heartbeat.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        }
        MessageType::Disconnect => return Ok(Some(EndReason::PeerDisconnected)),
        MessageType::CursorReturn => match CursorReturnPayload::decode(payload) {
            Ok(ret) => kvm.cursor_return(ret.edge, ret.position),
            Err(e) => warn!("bad CursorReturn payload: {e}"),
        },
        MessageType::VideoKeyRequest => {
            if let Some(pipeline) = video_pipeline {
                pipeline.request_keyframe();
            }
        }
        MessageType::DisplaySwitch => match serde_json::from_slice::<DisplaySwitch>(payload) {
            Ok(switch) => {
                // Mode changes mid-session require a new capture source;
                // the current build applies them at the next session.
                info!("companion requested display mode {:?}", switch.mode);
            }
            Err(e) => warn!("bad DisplaySwitch payload: {e}"),
        },
        other if other.is_input() => {
            // Input from the companion arrives only as CursorReturn in
            // this direction; anything else is tolerated noise while a
            // display switch is in flight.
            debug!("ignoring inbound input message {other:?}");
        }
        other => {
            error!("protocol violation on control channel: {other:?}");
            return Err(SessionError::ProtocolViolation {
                state: SessionState::Streaming,
                got: other,
            });
        }
    }
    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_matches_protocol_constants() {
        let timing = SessionTiming::default();
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(30));
        // Three missed heartbeats.
        assert_eq!(timing.heartbeat_timeout, timing.heartbeat_interval * 3);
    }

    #[test]
    fn test_default_ports_are_the_fixed_ones() {
        let ports = ChannelPorts::default();
        assert_eq!(ports.control, 42100);
        assert_eq!(ports.video, 42101);
        assert_eq!(ports.audio, 42102);
    }

    #[test]
    fn test_version_compatibility_is_major_based() {
        let mk = |v: &str| HandshakeInfo {
            app_version: v.to_string(),
            device_name: "x".into(),
            platform: Platform::MacOs,
            display_width: 1920,
            display_height: 1080,
            refresh_rate: 60,
            supports_audio: true,
            supports_input: true,
        };
        assert!(check_compatibility(&mk("0.3.0"), &mk("0.4.1")).is_ok());
        assert!(check_compatibility(&mk("0.3.0"), &mk("1.0.0")).is_err());
    }

    #[test]
    fn test_zero_display_is_incompatible() {
        let good = HandshakeInfo {
            app_version: "0.3.0".into(),
            device_name: "x".into(),
            platform: Platform::MacOs,
            display_width: 1920,
            display_height: 1080,
            refresh_rate: 60,
            supports_audio: true,
            supports_input: true,
        };
        let mut bad = good.clone();
        bad.display_width = 0;
        assert!(check_compatibility(&good, &bad).is_err());
    }
}
