//! Integration tests exercising the transport and discovery through their
//! public APIs, over real sockets on loopback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_core::protocol::message::{Channel, MessageFlags, MessageType};
use bridge_net::discovery::{self, DiscoveryResponder};
use bridge_net::transport::{Transport, TransportListener};

async fn connected_pair(channel: Channel) -> (Transport, Transport) {
    let listener = TransportListener::bind_addr("127.0.0.1:0".parse().unwrap(), channel)
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(Transport::connect(addr, channel), listener.accept());
    (client.expect("connect"), server.expect("accept"))
}

/// A high-rate single sender must be observed in exact call order,
/// regardless of how TCP segments the stream.
#[tokio::test]
async fn test_payload_order_matches_send_order_under_load() {
    let (client, server) = connected_pair(Channel::Video).await;
    let mut messages = server.messages();

    let sender = tokio::spawn(async move {
        for i in 0u32..2_000 {
            // Vary the size so message boundaries never align with reads.
            let mut payload = i.to_le_bytes().to_vec();
            payload.resize(4 + (i as usize % 97), 0xCC);
            client
                .send(MessageType::VideoFrame, MessageFlags::NONE, &payload)
                .await
                .expect("send");
        }
        client
    });

    for i in 0u32..2_000 {
        let (_, payload) = messages.next().await.expect("message");
        let got = u32::from_le_bytes(payload[..4].try_into().unwrap());
        assert_eq!(got, i, "message order must match send order");
    }
    let _client = sender.await.unwrap();
}

/// Concurrent senders may interleave arbitrarily, but every payload must
/// arrive intact and the total count must match.
#[tokio::test]
async fn test_concurrent_senders_are_serialized_per_message() {
    let (client, server) = connected_pair(Channel::Control).await;
    let mut messages = server.messages();
    let client = Arc::new(client);

    const WORKERS: usize = 8;
    const PER_WORKER: usize = 50;

    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            for i in 0..PER_WORKER {
                let mut payload = vec![w as u8];
                payload.extend_from_slice(&(i as u32).to_le_bytes());
                payload.resize(32, w as u8);
                client
                    .send(MessageType::Heartbeat, MessageFlags::NONE, &payload)
                    .await
                    .expect("send");
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut per_worker_next = [0u32; WORKERS];
    for _ in 0..WORKERS * PER_WORKER {
        let (_, payload) = messages.next().await.expect("message");
        let w = payload[0] as usize;
        let i = u32::from_le_bytes(payload[1..5].try_into().unwrap());
        // Per-sender order is preserved even though interleaving is free.
        assert_eq!(i, per_worker_next[w], "worker {w} reordered");
        per_worker_next[w] += 1;
        assert!(payload[5..].iter().all(|&b| b == w as u8), "payload torn");
    }
}

/// A large frame-sized message crosses intact.
#[tokio::test]
async fn test_large_payload_crosses_intact() {
    let (client, server) = connected_pair(Channel::Video).await;
    let mut messages = server.messages();

    let payload: Vec<u8> = (0..1920u32 * 1080 * 4 / 16)
        .flat_map(|i| i.to_le_bytes())
        .collect();
    client
        .send(
            MessageType::VideoFrame,
            MessageFlags(MessageFlags::KEY_FRAME),
            &payload,
        )
        .await
        .expect("send");

    let (header, received) = messages.next().await.expect("message");
    assert!(header.flags.key_frame());
    assert_eq!(received.len(), payload.len());
    assert_eq!(&received[..], &payload[..]);
}

/// Spec scenario: with a responder running, discovery answers within
/// 500 ms; without one, it returns `None` only after the full timeout.
#[test]
fn test_discovery_round_trip_and_timeout() {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let responder = DiscoveryResponder::start_on(port, "mac-mini".to_string()).expect("responder");

    let dest = format!("127.0.0.1:{port}").parse().unwrap();
    let start = Instant::now();
    let peer = discovery::discover_to(dest, Duration::from_millis(500), 3)
        .expect("no socket error")
        .expect("responder must answer");
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(peer.machine_name.as_deref(), Some("mac-mini"));

    responder.stop();
    // Allow the responder loop to observe the stop flag and release the port.
    std::thread::sleep(Duration::from_millis(600));

    let start = Instant::now();
    let none = discovery::discover_to(dest, Duration::from_millis(300), 3).expect("no error");
    assert_eq!(none, None);
    assert!(start.elapsed() >= Duration::from_millis(280));
}

/// Killing the peer completes the message stream promptly.
#[tokio::test]
async fn test_peer_loss_is_observed_within_a_second() {
    let (client, server) = connected_pair(Channel::Control).await;
    let mut messages = server.messages();

    client
        .send(MessageType::Heartbeat, MessageFlags::NONE, &[])
        .await
        .unwrap();
    messages.next().await.expect("heartbeat");

    let start = Instant::now();
    drop(client);
    assert!(messages.next().await.is_none());
    assert!(start.elapsed() < Duration::from_secs(1));
}
