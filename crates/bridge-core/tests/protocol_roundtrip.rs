//! Integration tests exercising the wire protocol through its public API:
//! framing, payload codecs, and frame layouts composed the way the
//! transport and pipelines actually use them.

use bridge_core::protocol::codec::{encode_message, FramingError, MessageDecoder};
use bridge_core::protocol::handshake::{HandshakeInfo, Platform, VideoCodec, VideoConfig};
use bridge_core::protocol::input::{
    ButtonAction, CursorReturnPayload, KeyPayload, MouseButtonPayload, MouseMovePayload,
    MouseScrollPayload,
};
use bridge_core::protocol::message::{Channel, MessageFlags, MessageType, HEADER_SIZE};
use bridge_core::video::frame::{FrameType, RawFrameHeader};
use bridge_core::EdgeSide;

/// Encodes a realistic mixed burst (handshake, config, input, video) and
/// verifies the decoder reproduces the exact sequence from an arbitrarily
/// re-chunked byte stream.
#[test]
fn test_mixed_message_burst_survives_rechunking() {
    let handshake = HandshakeInfo {
        app_version: "0.3.0".into(),
        device_name: "host-pc".into(),
        platform: Platform::Windows,
        display_width: 1920,
        display_height: 1080,
        refresh_rate: 60,
        supports_audio: true,
        supports_input: true,
    };
    let video_config = VideoConfig {
        codec: VideoCodec::RawBgra,
        width: 1920,
        height: 1080,
        target_fps: 30,
    };

    let mut frame_payload = Vec::new();
    RawFrameHeader {
        width: 2,
        height: 2,
        stride: 8,
        frame_number: 1,
    }
    .encode_into(&mut frame_payload);
    frame_payload.extend_from_slice(&[0x10; 16]);

    let messages: Vec<(MessageType, MessageFlags, Vec<u8>)> = vec![
        (
            MessageType::Handshake,
            MessageFlags::NONE,
            handshake.to_json(),
        ),
        (
            MessageType::VideoConfig,
            MessageFlags::NONE,
            video_config.to_json(),
        ),
        (
            MessageType::MouseMove,
            MessageFlags(MessageFlags::PRIORITY),
            MouseMovePayload { x: 12, y: 34 }.encode(),
        ),
        (
            MessageType::VideoFrame,
            MessageFlags(MessageFlags::KEY_FRAME),
            frame_payload,
        ),
        (
            MessageType::KeyDown,
            MessageFlags(MessageFlags::PRIORITY),
            KeyPayload { vk_code: 0x41 }.encode(),
        ),
        (MessageType::Disconnect, MessageFlags::NONE, Vec::new()),
    ];

    let mut stream = Vec::new();
    for (ty, flags, payload) in &messages {
        stream.extend_from_slice(&encode_message(*ty, *flags, payload));
    }

    // Re-chunk at awkward sizes.
    for chunk_size in [1, 3, HEADER_SIZE, 13, 64, stream.len()] {
        let mut decoder = MessageDecoder::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            decoder.extend(chunk);
            while let Some((header, payload)) = decoder.next().expect("decode") {
                decoded.push((header.msg_type, header.flags, payload.to_vec()));
            }
        }
        decoder.finish().expect("clean stream boundary");
        assert_eq!(decoded, messages, "chunk size {chunk_size}");
    }
}

#[test]
fn test_every_message_routes_to_a_channel_consistently() {
    // Routing is a pure function of the type: re-deriving the channel on
    // the receive side must agree with the send side for every type.
    let all = [
        MessageType::Handshake,
        MessageType::HandshakeAck,
        MessageType::Heartbeat,
        MessageType::Disconnect,
        MessageType::VideoFrame,
        MessageType::VideoConfig,
        MessageType::DisplaySwitch,
        MessageType::DisplayStatus,
        MessageType::VideoKeyRequest,
        MessageType::AudioData,
        MessageType::AudioConfig,
        MessageType::AudioControl,
        MessageType::MouseMove,
        MessageType::MouseButton,
        MessageType::MouseScroll,
        MessageType::CursorReturn,
        MessageType::KeyDown,
        MessageType::KeyUp,
        MessageType::ClipboardSync,
        MessageType::KvmConfig,
    ];
    for ty in all {
        let channel = Channel::for_type(ty);
        match ty {
            MessageType::VideoFrame | MessageType::VideoConfig | MessageType::DisplayStatus => {
                assert_eq!(channel, Channel::Video)
            }
            MessageType::AudioData | MessageType::AudioConfig | MessageType::AudioControl => {
                assert_eq!(channel, Channel::Audio)
            }
            _ => assert_eq!(channel, Channel::Control, "{ty:?}"),
        }
    }
}

#[test]
fn test_input_payload_round_trips_through_framing() {
    let cases: Vec<(MessageType, Vec<u8>)> = vec![
        (
            MessageType::MouseButton,
            MouseButtonPayload {
                action: ButtonAction::RightDown,
            }
            .encode(),
        ),
        (
            MessageType::MouseScroll,
            MouseScrollPayload { dx: 0, dy: -120 }.encode(),
        ),
        (
            MessageType::CursorReturn,
            CursorReturnPayload {
                edge: EdgeSide::Left,
                position: 0.5,
            }
            .encode(),
        ),
    ];

    for (ty, payload) in cases {
        let bytes = encode_message(ty, MessageFlags(MessageFlags::PRIORITY), &payload);
        let mut decoder = MessageDecoder::new();
        decoder.extend(&bytes);
        let (header, body) = decoder.next().unwrap().expect("one message");
        assert_eq!(header.msg_type, ty);
        assert!(header.flags.priority());
        assert_eq!(&body[..], &payload[..]);
    }
}

#[test]
fn test_truncation_never_panics_anywhere() {
    let payload = MouseMovePayload { x: 1, y: 2 }.encode();
    let bytes = encode_message(MessageType::MouseMove, MessageFlags::NONE, &payload);
    for cut in 0..bytes.len() {
        let mut decoder = MessageDecoder::new();
        decoder.extend(&bytes[..cut]);
        // Either incomplete (Ok(None)) or a framing error from finish();
        // never a panic.
        if decoder.next().expect("no mid-stream error on truncation").is_none() && cut > 0 {
            let err = decoder.finish().unwrap_err();
            assert!(matches!(
                err,
                FramingError::ShortHeader { .. } | FramingError::ShortPayload { .. }
            ));
        }
    }
}

#[test]
fn test_keyframe_flag_matches_idr_convention() {
    // The KEY_FRAME flag must be set iff the encoded frame type is IDR.
    for (frame_type, expect_key) in [
        (FrameType::P, false),
        (FrameType::Idr, true),
        (FrameType::B, false),
    ] {
        let flags = if matches!(frame_type, FrameType::Idr) {
            MessageFlags(MessageFlags::KEY_FRAME)
        } else {
            MessageFlags::NONE
        };
        assert_eq!(flags.key_frame(), expect_key);
    }
}
