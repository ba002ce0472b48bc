//! Companion session: accept, handshake, dispatch, tear down.
//!
//! The companion is the responder. It listens on the three fixed ports,
//! accepts exactly one host, answers the handshake, and then runs one
//! dispatch loop per channel. The loss of any channel, or a protocol
//! violation on any of them, ends the whole session; the next host must
//! start from a fresh accept.
//!
//! Ordering across channels is not guaranteed, so the control loop is
//! deliberately tolerant of input events racing a `DisplaySwitch`: input
//! applies to whatever the current target is.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bridge_core::protocol::handshake::{HandshakeInfo, Platform};
use bridge_core::protocol::message::{Channel, ChannelPorts, MessageFlags, MessageType};
use bridge_core::Rect;
use bridge_net::transport::{
    MessageStream, Transport, TransportError, TransportListener,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::inject_input::{InjectError, InjectInputUseCase, ReturnLink};
use crate::application::play_audio::{AudioMixer, AudioMixerError};
use crate::application::render_video::{VideoReceiveError, VideoReceiver};
use crate::infrastructure::audio_output::AudioSink;
use crate::infrastructure::display::FrameSink;
use crate::infrastructure::input_injection::InputInjector;

/// How long the remaining channels may lag behind the control accept.
const FOLLOWUP_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why the session ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    PeerDisconnected,
    ChannelLost(Channel),
    HeartbeatTimeout,
    ShutdownRequested,
}

#[derive(Debug, Error)]
pub enum CompanionSessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol violation: unexpected {got:?} on {channel}")]
    ProtocolViolation { channel: Channel, got: MessageType },

    #[error("video stream error: {0}")]
    Video(#[from] VideoReceiveError),

    #[error("input stream error: {0}")]
    Inject(#[from] InjectError),
}

/// Timeouts and intervals, overridable by tests.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    pub heartbeat_interval: Duration,
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

pub struct CompanionSessionOptions {
    pub device_name: String,
    pub display_width: i32,
    pub display_height: i32,
    pub refresh_rate: i32,
    pub timing: SessionTiming,
}

/// Platform sinks injected at session start.
pub struct CompanionDevices {
    pub injector: Arc<dyn InputInjector>,
    pub frame_sink: Arc<dyn FrameSink>,
    pub audio_sink: Arc<dyn AudioSink>,
}

/// The three bound listeners, ready to accept one host.
pub struct CompanionListeners {
    control: TransportListener,
    video: TransportListener,
    audio: TransportListener,
}

impl CompanionListeners {
    /// Binds the fixed session ports on all interfaces.
    pub async fn bind_default() -> Result<Self, TransportError> {
        Self::bind(IpAddr::from([0, 0, 0, 0]), ChannelPorts::default()).await
    }

    /// Binds explicit ports (port 0 picks an ephemeral one; see
    /// [`ports`](Self::ports) for the result).
    pub async fn bind(ip: IpAddr, ports: ChannelPorts) -> Result<Self, TransportError> {
        let control =
            TransportListener::bind_addr((ip, ports.control).into(), Channel::Control).await?;
        let video = TransportListener::bind_addr((ip, ports.video).into(), Channel::Video).await?;
        let audio = TransportListener::bind_addr((ip, ports.audio).into(), Channel::Audio).await?;
        Ok(Self {
            control,
            video,
            audio,
        })
    }

    /// The actually bound port triple.
    pub fn ports(&self) -> ChannelPorts {
        let port = |l: &TransportListener, fallback: u16| {
            l.local_addr().map(|a| a.port()).unwrap_or(fallback)
        };
        ChannelPorts {
            control: port(&self.control, Channel::Control.port()),
            video: port(&self.video, Channel::Video.port()),
            audio: port(&self.audio, Channel::Audio.port()),
        }
    }
}

/// Counters reported after teardown.
#[derive(Debug)]
pub struct CompanionSummary {
    pub session_id: Uuid,
    pub reason: EndReason,
    pub frames_presented: u64,
    pub audio_packets_received: u64,
    pub events_injected: u64,
}

/// Serves exactly one host session on the given listeners.
///
/// # Errors
///
/// [`CompanionSessionError`] for handshake failures and protocol
/// violations; clean ends (disconnect, channel loss, shutdown) are `Ok`.
pub async fn run_companion_session(
    opts: CompanionSessionOptions,
    listeners: CompanionListeners,
    devices: CompanionDevices,
    mut shutdown: watch::Receiver<bool>,
) -> Result<CompanionSummary, CompanionSessionError> {
    let session_id = Uuid::new_v4();

    // ── Accept: control first, then video and audio ───────────────────────────
    info!(%session_id, "companion: waiting for a host");
    let control = tokio::select! {
        accepted = listeners.control.accept() => accepted?,
        _ = shutdown.changed() => {
            return Ok(idle_summary(session_id, EndReason::ShutdownRequested));
        }
    };
    info!(%session_id, "companion: host at {}", control.peer_addr());

    let video = accept_followup(&listeners.video).await?;
    let audio = accept_followup(&listeners.audio).await?;

    // ── Handshake ─────────────────────────────────────────────────────────────
    let mut control_messages = control.messages();
    let hello = match tokio::time::timeout(opts.timing.handshake_timeout, control_messages.next())
        .await
    {
        Err(_elapsed) => {
            return Err(CompanionSessionError::Handshake("timed out".to_string()));
        }
        Ok(None) => return Err(TransportError::NotConnected.into()),
        Ok(Some((header, payload))) => {
            if header.msg_type != MessageType::Handshake {
                return Err(CompanionSessionError::ProtocolViolation {
                    channel: Channel::Control,
                    got: header.msg_type,
                });
            }
            HandshakeInfo::from_json(&payload)
                .map_err(|e| CompanionSessionError::Handshake(e.to_string()))?
        }
    };
    info!(
        %session_id,
        "companion: handshake from {} ({:?}, {}x{})",
        hello.device_name, hello.platform, hello.display_width, hello.display_height
    );

    let ack = HandshakeInfo {
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        device_name: opts.device_name.clone(),
        platform: Platform::MacOs,
        display_width: opts.display_width,
        display_height: opts.display_height,
        refresh_rate: opts.refresh_rate,
        supports_audio: true,
        supports_input: true,
    };
    control
        .send(MessageType::HandshakeAck, MessageFlags::NONE, &ack.to_json())
        .await?;

    // ── Streaming ─────────────────────────────────────────────────────────────
    let control = Arc::new(control);
    let screen_rect = Rect::from_size(opts.display_width, opts.display_height);

    let receiver = Arc::new(Mutex::new(VideoReceiver::new(Arc::clone(
        &devices.frame_sink,
    ))));
    let mixer = Arc::new(AudioMixer::start(Arc::clone(&devices.audio_sink)));
    let mut inject = InjectInputUseCase::new(
        Arc::clone(&devices.injector),
        Arc::clone(&control) as Arc<dyn ReturnLink>,
        screen_rect,
    );

    // Channel watchers: each terminal condition lands in one place.
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(4);
    spawn_video_loop(video.messages(), Arc::clone(&receiver), event_tx.clone());
    spawn_audio_loop(audio.messages(), Arc::clone(&mixer), event_tx.clone());

    // Heartbeats both ways.
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

    info!(%session_id, "companion: streaming");
    let mut starvation_check = tokio::time::interval(opts.timing.heartbeat_interval / 3);
    starvation_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let outcome: Result<EndReason, CompanionSessionError> = loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break Ok(EndReason::ShutdownRequested);
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(SessionEvent::ChannelDown(channel)) => {
                        break Ok(EndReason::ChannelLost(channel));
                    }
                    Some(SessionEvent::Fatal(e)) => break Err(e),
                    None => break Ok(EndReason::ChannelLost(Channel::Video)),
                }
            }
            _ = starvation_check.tick() => {
                let last = *last_peer_heartbeat.lock().unwrap_or_else(|e| e.into_inner());
                if last.elapsed() > opts.timing.heartbeat_timeout {
                    warn!("heartbeat starvation: host silent for {:?}", last.elapsed());
                    break Ok(EndReason::HeartbeatTimeout);
                }
            }
            msg = control_messages.next() => {
                let (header, payload) = match msg {
                    Some(m) => m,
                    None => break Ok(EndReason::ChannelLost(Channel::Control)),
                };
                match header.msg_type {
                    MessageType::Heartbeat => {
                        *last_peer_heartbeat.lock().unwrap_or_else(|e| e.into_inner()) =
                            Instant::now();
                    }
                    MessageType::Disconnect => break Ok(EndReason::PeerDisconnected),
                    MessageType::KvmConfig => {
                        debug!("KVM config update: {}", String::from_utf8_lossy(&payload));
                    }
                    MessageType::ClipboardSync => {
                        debug!("clipboard sync not implemented; ignoring");
                    }
                    ty if ty.is_input() => {
                        if let Err(e) = inject.handle(ty, &payload) {
                            break Err(e.into());
                        }
                    }
                    other => {
                        break Err(CompanionSessionError::ProtocolViolation {
                            channel: Channel::Control,
                            got: other,
                        });
                    }
                }
            }
        }
    };

    // A channel that died of protocol corruption is a violation, not a
    // clean loss; surface the framing fault instead.
    let outcome = match outcome {
        Ok(reason @ EndReason::ChannelLost(_)) => {
            match control
                .fault()
                .or_else(|| video.fault())
                .or_else(|| audio.fault())
            {
                Some(fault) => Err(fault.into()),
                None => Ok(reason),
            }
        }
        other => other,
    };

    // ── Teardown ──────────────────────────────────────────────────────────────
    info!(%session_id, "companion: tearing down ({outcome:?})");
    heartbeat_task.abort();
    mixer.stop();

    let frames_presented = receiver
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .frames_presented();
    let audio_packets_received = mixer.packets_received();
    let events_injected = inject.events_injected();

    // Data channels close first; goodbye on control, closed last.
    drop(video);
    drop(audio);
    let _ = tokio::time::timeout(
        Duration::from_millis(250),
        control.send(MessageType::Disconnect, MessageFlags::NONE, &[]),
    )
    .await;
    drop(control);

    let reason = outcome?;
    Ok(CompanionSummary {
        session_id,
        reason,
        frames_presented,
        audio_packets_received,
        events_injected,
    })
}

fn idle_summary(session_id: Uuid, reason: EndReason) -> CompanionSummary {
    CompanionSummary {
        session_id,
        reason,
        frames_presented: 0,
        audio_packets_received: 0,
        events_injected: 0,
    }
}

async fn accept_followup(
    listener: &TransportListener,
) -> Result<Transport, CompanionSessionError> {
    match tokio::time::timeout(FOLLOWUP_ACCEPT_TIMEOUT, listener.accept()).await {
        Ok(result) => Ok(result?),
        Err(_elapsed) => Err(CompanionSessionError::Handshake(
            "host never attached all three channels".to_string(),
        )),
    }
}

enum SessionEvent {
    ChannelDown(Channel),
    Fatal(CompanionSessionError),
}

fn spawn_video_loop(
    mut messages: MessageStream,
    receiver: Arc<Mutex<VideoReceiver>>,
    events: mpsc::Sender<SessionEvent>,
) {
    tokio::spawn(async move {
        while let Some((header, payload)) = messages.next().await {
            let result = {
                let mut receiver = receiver.lock().unwrap_or_else(|e| e.into_inner());
                match header.msg_type {
                    MessageType::VideoConfig => {
                        match bridge_core::protocol::handshake::VideoConfig::from_json(&payload) {
                            Ok(config) => {
                                receiver.handle_config(config);
                                Ok(())
                            }
                            Err(e) => {
                                warn!("bad VideoConfig: {e}");
                                Ok(())
                            }
                        }
                    }
                    MessageType::VideoFrame => receiver
                        .handle_frame(header.flags, &payload)
                        .map_err(CompanionSessionError::Video),
                    MessageType::DisplayStatus => Ok(()),
                    other => Err(CompanionSessionError::ProtocolViolation {
                        channel: Channel::Video,
                        got: other,
                    }),
                }
            };
            if let Err(e) = result {
                let _ = events.send(SessionEvent::Fatal(e)).await;
                return;
            }
        }
        let _ = events.send(SessionEvent::ChannelDown(Channel::Video)).await;
    });
}

fn spawn_audio_loop(
    mut messages: MessageStream,
    mixer: Arc<AudioMixer>,
    events: mpsc::Sender<SessionEvent>,
) {
    tokio::spawn(async move {
        while let Some((header, payload)) = messages.next().await {
            let result = match header.msg_type {
                MessageType::AudioConfig => mixer.handle_config(&payload),
                MessageType::AudioData => mixer.handle_data(&payload),
                MessageType::AudioControl => mixer.handle_control(&payload),
                other => {
                    let _ = events
                        .send(SessionEvent::Fatal(
                            CompanionSessionError::ProtocolViolation {
                                channel: Channel::Audio,
                                got: other,
                            },
                        ))
                        .await;
                    return;
                }
            };
            if let Err(e) = result {
                // Audio failures are pipeline-local: log, stop consuming
                // meaningfully, keep the session alive.
                match e {
                    AudioMixerError::ConfigMissing | AudioMixerError::ShortPacket => {
                        warn!("audio packet rejected: {e}");
                    }
                    other => {
                        warn!("audio pipeline stopped: {other}");
                    }
                }
            }
        }
        let _ = events.send(SessionEvent::ChannelDown(Channel::Audio)).await;
    });
}
