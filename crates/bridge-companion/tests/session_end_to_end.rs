//! End-to-end companion session tests: a scripted host drives the real
//! session over loopback TCP and the platform sinks record what came out.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bridge_companion::application::session::{
    run_companion_session, CompanionDevices, CompanionListeners, CompanionSessionError,
    CompanionSessionOptions, EndReason, SessionTiming,
};
use bridge_companion::infrastructure::audio_output::RecordingAudioSink;
use bridge_companion::infrastructure::display::RecordingFrameSink;
use bridge_companion::infrastructure::input_injection::RecordingInjector;
use bridge_core::protocol::handshake::{HandshakeInfo, Platform, VideoCodec, VideoConfig};
use bridge_core::protocol::input::MouseMovePayload;
use bridge_core::protocol::message::{Channel, ChannelPorts, MessageFlags, MessageType};
use bridge_core::video::delta::xor_into;
use bridge_core::video::frame::RawFrameHeader;
use bridge_net::transport::{Transport, TransportError};
use tokio::sync::watch;

struct Sinks {
    injector: Arc<RecordingInjector>,
    frames: Arc<RecordingFrameSink>,
    audio: Arc<RecordingAudioSink>,
}

fn devices() -> (CompanionDevices, Sinks) {
    let injector = Arc::new(RecordingInjector::default());
    let frames = Arc::new(RecordingFrameSink::default());
    let audio = Arc::new(RecordingAudioSink::default());
    (
        CompanionDevices {
            injector: Arc::clone(&injector) as _,
            frame_sink: Arc::clone(&frames) as _,
            audio_sink: Arc::clone(&audio) as _,
        },
        Sinks {
            injector,
            frames,
            audio,
        },
    )
}

fn options() -> CompanionSessionOptions {
    CompanionSessionOptions {
        device_name: "test-companion".to_string(),
        display_width: 2560,
        display_height: 1600,
        refresh_rate: 60,
        timing: SessionTiming {
            heartbeat_interval: Duration::from_millis(200),
            heartbeat_timeout: Duration::from_millis(600),
            handshake_timeout: Duration::from_secs(2),
        },
    }
}

fn host_hello() -> HandshakeInfo {
    HandshakeInfo {
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        device_name: "test-host".to_string(),
        platform: Platform::Windows,
        display_width: 1920,
        display_height: 1080,
        refresh_rate: 60,
        supports_audio: true,
        supports_input: true,
    }
}

async fn dial(ports: ChannelPorts) -> (Transport, Transport, Transport) {
    let ip: IpAddr = "127.0.0.1".parse().unwrap();
    let control = Transport::connect((ip, ports.control).into(), Channel::Control)
        .await
        .expect("control");
    let video = Transport::connect((ip, ports.video).into(), Channel::Video)
        .await
        .expect("video");
    let audio = Transport::connect((ip, ports.audio).into(), Channel::Audio)
        .await
        .expect("audio");
    (control, video, audio)
}

fn raw_frame_payload(frame_number: i32, pixels: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    RawFrameHeader {
        width: 4,
        height: 2,
        stride: 16,
        frame_number,
    }
    .encode_into(&mut payload);
    payload.extend_from_slice(pixels);
    payload
}

/// Full scripted session: handshake, video keyframe + delta, audio, input,
/// clean disconnect. The companion must reconstruct the second frame
/// exactly and ack the handshake within the deadline.
#[tokio::test]
async fn test_full_session_against_scripted_host() {
    let listeners = CompanionListeners::bind(
        "127.0.0.1".parse().unwrap(),
        ChannelPorts {
            control: 0,
            video: 0,
            audio: 0,
        },
    )
    .await
    .expect("bind");
    let ports = listeners.ports();

    let (devices, sinks) = devices();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = tokio::spawn(run_companion_session(
        options(),
        listeners,
        devices,
        shutdown_rx,
    ));

    let (control, video, audio) = dial(ports).await;
    let mut control_messages = control.messages();

    // Handshake.
    control
        .send(
            MessageType::Handshake,
            MessageFlags::NONE,
            &host_hello().to_json(),
        )
        .await
        .unwrap();
    let ack = tokio::time::timeout(Duration::from_millis(500), control_messages.next())
        .await
        .expect("ack within deadline")
        .expect("ack message");
    assert_eq!(ack.0.msg_type, MessageType::HandshakeAck);
    let ack_info = HandshakeInfo::from_json(&ack.1).expect("ack JSON");
    assert_eq!(ack_info.platform, Platform::MacOs);
    assert_eq!(ack_info.display_width, 2560);

    // Video: config, keyframe F0, delta to F1.
    let config = VideoConfig {
        codec: VideoCodec::RawBgra,
        width: 4,
        height: 2,
        target_fps: 30,
    };
    video
        .send(MessageType::VideoConfig, MessageFlags::NONE, &config.to_json())
        .await
        .unwrap();

    let f0 = [0x40u8; 32];
    let mut f1 = f0;
    f1[13] ^= 0xFF; // one pixel changes
    let mut delta = vec![0u8; 32];
    assert!(xor_into(&f1, &f0, &mut delta));

    video
        .send(
            MessageType::VideoFrame,
            MessageFlags(MessageFlags::KEY_FRAME),
            &raw_frame_payload(1, &f0),
        )
        .await
        .unwrap();
    video
        .send(
            MessageType::VideoFrame,
            MessageFlags(MessageFlags::COMPRESSED),
            &raw_frame_payload(2, &delta),
        )
        .await
        .unwrap();

    // Audio: config then one packet.
    audio
        .send(
            MessageType::AudioConfig,
            MessageFlags::NONE,
            &bridge_core::protocol::handshake::AudioConfig::default().to_json(),
        )
        .await
        .unwrap();
    let mut audio_packet = 12345i64.to_le_bytes().to_vec();
    audio_packet.extend_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);
    audio
        .send(MessageType::AudioData, MessageFlags::NONE, &audio_packet)
        .await
        .unwrap();

    // Input: one mouse move.
    control
        .send(
            MessageType::MouseMove,
            MessageFlags(MessageFlags::PRIORITY),
            &MouseMovePayload { x: 640, y: 400 }.encode(),
        )
        .await
        .unwrap();

    // Wait for everything to land, then disconnect.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline
        && (sinks.frames.raw_count() < 2
            || sinks.audio.scheduled_count() < 1
            || sinks.injector.moves.lock().unwrap().is_empty())
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    control
        .send(MessageType::Disconnect, MessageFlags::NONE, &[])
        .await
        .unwrap();

    let summary = session.await.unwrap().expect("session result");
    assert_eq!(summary.reason, EndReason::PeerDisconnected);
    assert_eq!(summary.frames_presented, 2);
    assert_eq!(summary.audio_packets_received, 1);
    assert_eq!(summary.events_injected, 1);

    // The reconstructed second frame equals F1 exactly.
    assert_eq!(sinks.frames.last_raw_pixels().unwrap(), f1.to_vec());
    // The audio packet lost its timestamp prefix on the way to the sink.
    let scheduled = sinks.audio.scheduled.lock().unwrap();
    assert_eq!(scheduled[0].0, 12345);
    assert_eq!(scheduled[0].1, vec![1, 0, 2, 0, 3, 0, 4, 0]);
    drop(scheduled);
    // The mouse move was injected at the wire coordinates.
    assert_eq!(*sinks.injector.moves.lock().unwrap(), vec![(640, 400)]);
}

/// A delta without a preceding keyframe is a protocol violation and kills
/// the session.
#[tokio::test]
async fn test_delta_before_keyframe_is_session_fatal() {
    let listeners = CompanionListeners::bind(
        "127.0.0.1".parse().unwrap(),
        ChannelPorts {
            control: 0,
            video: 0,
            audio: 0,
        },
    )
    .await
    .expect("bind");
    let ports = listeners.ports();

    let (devices, _sinks) = devices();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = tokio::spawn(run_companion_session(
        options(),
        listeners,
        devices,
        shutdown_rx,
    ));

    let (control, video, _audio) = dial(ports).await;
    let mut control_messages = control.messages();
    control
        .send(
            MessageType::Handshake,
            MessageFlags::NONE,
            &host_hello().to_json(),
        )
        .await
        .unwrap();
    control_messages.next().await.expect("ack");

    let config = VideoConfig {
        codec: VideoCodec::RawBgra,
        width: 4,
        height: 2,
        target_fps: 30,
    };
    video
        .send(MessageType::VideoConfig, MessageFlags::NONE, &config.to_json())
        .await
        .unwrap();
    video
        .send(
            MessageType::VideoFrame,
            MessageFlags(MessageFlags::COMPRESSED),
            &raw_frame_payload(1, &[0u8; 32]),
        )
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), session)
        .await
        .expect("session ends")
        .unwrap();
    assert!(result.is_err(), "keyframe-first violation must be fatal");
}

/// Garbage bytes on the video channel surface as a framing fault, not a
/// clean channel loss.
#[tokio::test]
async fn test_corrupt_video_stream_is_session_fatal() {
    use tokio::io::AsyncWriteExt;

    let listeners = CompanionListeners::bind(
        "127.0.0.1".parse().unwrap(),
        ChannelPorts {
            control: 0,
            video: 0,
            audio: 0,
        },
    )
    .await
    .expect("bind");
    let ports = listeners.ports();

    let (devices, _sinks) = devices();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = tokio::spawn(run_companion_session(
        options(),
        listeners,
        devices,
        shutdown_rx,
    ));

    let ip: IpAddr = "127.0.0.1".parse().unwrap();
    let control = Transport::connect((ip, ports.control).into(), Channel::Control)
        .await
        .expect("control");
    let mut raw_video = tokio::net::TcpStream::connect((ip, ports.video))
        .await
        .expect("raw video");
    let _audio = Transport::connect((ip, ports.audio).into(), Channel::Audio)
        .await
        .expect("audio");

    let mut control_messages = control.messages();
    control
        .send(
            MessageType::Handshake,
            MessageFlags::NONE,
            &host_hello().to_json(),
        )
        .await
        .unwrap();
    control_messages.next().await.expect("ack");

    // An 8-byte header with a type word outside the enumeration.
    let mut garbage = Vec::new();
    garbage.extend_from_slice(&0xBEEFu16.to_le_bytes());
    garbage.extend_from_slice(&0u16.to_le_bytes());
    garbage.extend_from_slice(&0u32.to_le_bytes());
    raw_video.write_all(&garbage).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), session)
        .await
        .expect("session ends")
        .unwrap();
    assert!(
        matches!(
            result,
            Err(CompanionSessionError::Transport(TransportError::Framing(_)))
        ),
        "corruption must not look like a clean disconnect: {result:?}"
    );
}

/// Dropping the host mid-session tears the companion session down
/// promptly.
#[tokio::test]
async fn test_host_loss_ends_session_within_a_second() {
    let listeners = CompanionListeners::bind(
        "127.0.0.1".parse().unwrap(),
        ChannelPorts {
            control: 0,
            video: 0,
            audio: 0,
        },
    )
    .await
    .expect("bind");
    let ports = listeners.ports();

    let (devices, _sinks) = devices();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = tokio::spawn(run_companion_session(
        options(),
        listeners,
        devices,
        shutdown_rx,
    ));

    let (control, video, audio) = dial(ports).await;
    let mut control_messages = control.messages();
    control
        .send(
            MessageType::Handshake,
            MessageFlags::NONE,
            &host_hello().to_json(),
        )
        .await
        .unwrap();
    control_messages.next().await.expect("ack");

    let start = std::time::Instant::now();
    drop(control);
    drop(video);
    drop(audio);

    let summary = tokio::time::timeout(Duration::from_secs(1), session)
        .await
        .expect("teardown within a second")
        .unwrap()
        .expect("clean end");
    assert!(matches!(summary.reason, EndReason::ChannelLost(_)));
    assert!(start.elapsed() < Duration::from_secs(1));
}
