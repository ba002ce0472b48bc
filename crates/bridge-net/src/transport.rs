//! Per-channel framed TCP transport.
//!
//! A [`Transport`] owns exactly one TCP connection and gives the rest of
//! the system two ends to hold:
//!
//! - **Send side**: [`Transport::send`] (async) and
//!   [`Transport::blocking_send`] (for pipeline worker threads). All sends
//!   funnel through one writer task, so concurrent callers are serialized
//!   FIFO and each message leaves as a single contiguous write.
//! - **Receive side**: [`Transport::messages`] hands out the non-restartable
//!   stream of decoded `(header, payload)` pairs fed by the read task.
//!
//! A read error, framing error, or EOF completes the message stream,
//! delivers [`TransportEvent::Disconnected`] exactly once, and makes every
//! later send fail with [`TransportError::NotConnected`]. A de-framing
//! failure additionally records a terminal fault, readable through
//! [`Transport::fault`], so the session can tell protocol corruption
//! apart from a clean disconnect.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_core::protocol::codec::{encode_message, FramingError, MessageDecoder};
use bridge_core::protocol::message::{Channel, MessageFlags, MessageHeader, MessageType};
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Send/receive socket buffer size requested from the OS.
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;
/// Capacity of the internal send queue (messages, not bytes).
const SEND_QUEUE_DEPTH: usize = 256;
/// Capacity of the decoded-message queue handed to the consumer.
const RECV_QUEUE_DEPTH: usize = 256;
/// Read chunk size for the framed reader.
const READ_CHUNK: usize = 64 * 1024;

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} failed after {attempts} attempt(s)")]
    RetriesExhausted { addr: SocketAddr, attempts: u32 },

    #[error("bind on {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {source}")]
    Accept {
        #[source]
        source: std::io::Error,
    },

    /// The connection is gone; no further sends are possible.
    #[error("transport is not connected")]
    NotConnected,

    /// The send queue is full (only surfaced by [`Transport::try_send`]).
    #[error("transport send queue is full")]
    SendQueueFull,

    /// The peer's byte stream failed to de-frame. Recorded as the
    /// transport's terminal fault (see [`Transport::fault`]); sessions
    /// treat it as a protocol violation, not a clean disconnect.
    #[error("framing error on receive: {0}")]
    Framing(#[from] FramingError),
}

/// Connection lifecycle notifications. `Disconnected` is delivered at most
/// once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(SocketAddr),
    Disconnected,
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Resettable per-transport counters.
#[derive(Debug, Default)]
pub struct TransportStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl TransportStats {
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
    }
}

// ── Message stream ────────────────────────────────────────────────────────────

/// The receive side of a transport: decoded messages in arrival order.
///
/// The stream completes (returns `None`) when the connection closes; it is
/// not restartable.
pub struct MessageStream {
    rx: mpsc::Receiver<(MessageHeader, Bytes)>,
}

impl MessageStream {
    /// Awaits the next message; `None` when the connection is gone.
    pub async fn next(&mut self) -> Option<(MessageHeader, Bytes)> {
        self.rx.recv().await
    }

    /// Blocking variant for worker threads.
    pub fn blocking_next(&mut self) -> Option<(MessageHeader, Bytes)> {
        self.rx.blocking_recv()
    }

    /// Non-blocking poll used by drain loops during teardown.
    pub fn try_next(&mut self) -> Option<(MessageHeader, Bytes)> {
        self.rx.try_recv().ok()
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// One TCP endpoint of one channel.
pub struct Transport {
    channel: Channel,
    peer_addr: SocketAddr,
    writer_tx: mpsc::Sender<Vec<u8>>,
    connected: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    fault: Arc<Mutex<Option<FramingError>>>,
    messages: Mutex<Option<MessageStream>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl Transport {
    /// Dials `addr` for the given channel and applies TCP tuning.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connect`] when the dial fails.
    pub async fn connect(addr: SocketAddr, channel: Channel) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        debug!("{channel}: connected to {addr}");
        Ok(Self::from_stream(stream, addr, channel))
    }

    /// Dials with up to `max_attempts` tries. Each attempt is bounded by
    /// `delay` and failed attempts wait `delay` before the next try.
    ///
    /// # Errors
    ///
    /// [`TransportError::RetriesExhausted`] when every attempt fails.
    pub async fn connect_with_retry(
        addr: SocketAddr,
        channel: Channel,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<Self, TransportError> {
        for attempt in 1..=max_attempts {
            match tokio::time::timeout(delay, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("{channel}: connected to {addr} (attempt {attempt})");
                    return Ok(Self::from_stream(stream, addr, channel));
                }
                Ok(Err(e)) => {
                    debug!("{channel}: connect attempt {attempt}/{max_attempts} failed: {e}");
                }
                Err(_elapsed) => {
                    debug!("{channel}: connect attempt {attempt}/{max_attempts} timed out");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Err(TransportError::RetriesExhausted {
            addr,
            attempts: max_attempts,
        })
    }

    /// Wraps an accepted or dialed stream, spawning the reader and writer
    /// tasks.
    fn from_stream(stream: TcpStream, peer_addr: SocketAddr, channel: Channel) -> Self {
        tune_socket(&stream, channel);

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::channel::<Vec<u8>>(SEND_QUEUE_DEPTH);
        let (msg_tx, msg_rx) = mpsc::channel(RECV_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let connected = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(TransportStats::default());
        let fault = Arc::new(Mutex::new(None));
        let disconnect_once = Arc::new(AtomicBool::new(false));

        let _ = event_tx.send(TransportEvent::Connected(peer_addr));

        tokio::spawn(write_loop(
            write_half,
            writer_rx,
            Arc::clone(&connected),
            Arc::clone(&stats),
            Arc::clone(&disconnect_once),
            event_tx.clone(),
            channel,
        ));
        tokio::spawn(read_loop(
            read_half,
            msg_tx,
            Arc::clone(&connected),
            Arc::clone(&stats),
            Arc::clone(&fault),
            disconnect_once,
            event_tx,
            channel,
        ));

        Self {
            channel,
            peer_addr,
            writer_tx,
            connected,
            stats,
            fault,
            messages: Mutex::new(Some(MessageStream { rx: msg_rx })),
            events: Mutex::new(Some(event_rx)),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// The de-framing error that killed the connection, if the message
    /// stream completed because of protocol corruption rather than a
    /// clean close. Sessions check this when a stream ends to decide
    /// between "peer went away" and "peer is speaking garbage".
    pub fn fault(&self) -> Option<TransportError> {
        self.fault
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .map(TransportError::Framing)
    }

    /// Takes the receive stream.
    ///
    /// # Panics
    ///
    /// The stream is handed out once; taking it twice is a wiring bug and
    /// panics.
    pub fn messages(&self) -> MessageStream {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .expect("transport message stream already taken")
    }

    /// Takes the event stream (handed out once, like the message stream).
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Frames and queues one message. Concurrent callers are serialized
    /// FIFO by the writer task.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] once the connection is gone.
    pub async fn send(
        &self,
        msg_type: MessageType,
        flags: MessageFlags,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let frame = self.frame_for_send(msg_type, flags, payload)?;
        self.writer_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Non-blocking variant for small messages queued from inside an
    /// async dispatch loop.
    ///
    /// # Errors
    ///
    /// [`TransportError::SendQueueFull`] when the writer is saturated; by
    /// then the connection is effectively dead and the session is about
    /// to notice.
    pub fn try_send(
        &self,
        msg_type: MessageType,
        flags: MessageFlags,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let frame = self.frame_for_send(msg_type, flags, payload)?;
        self.writer_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::SendQueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected,
        })
    }

    /// [`send`](Self::send) for dedicated worker threads outside the
    /// runtime.
    pub fn blocking_send(
        &self,
        msg_type: MessageType,
        flags: MessageFlags,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let frame = self.frame_for_send(msg_type, flags, payload)?;
        self.writer_tx
            .blocking_send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    fn frame_for_send(
        &self,
        msg_type: MessageType,
        flags: MessageFlags,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        trace!(
            "{}: queue {msg_type:?} ({} payload bytes)",
            self.channel,
            payload.len()
        );
        Ok(encode_message(msg_type, flags, payload))
    }

    /// Drops the send path, which closes the socket's write half after the
    /// queue drains. The read side observes EOF shortly after.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Listening side of a channel (companion role).
pub struct TransportListener {
    inner: TcpListener,
    channel: Channel,
}

impl TransportListener {
    /// Binds the channel's fixed port on all interfaces.
    pub async fn bind(channel: Channel) -> Result<Self, TransportError> {
        let addr: SocketAddr = ([0, 0, 0, 0], channel.port()).into();
        Self::bind_addr(addr, channel).await
    }

    /// Binds an explicit address (tests use an ephemeral port).
    pub async fn bind_addr(addr: SocketAddr, channel: Channel) -> Result<Self, TransportError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        Ok(Self { inner, channel })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr().ok()
    }

    /// Accepts one peer connection.
    pub async fn accept(&self) -> Result<Transport, TransportError> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|source| TransportError::Accept { source })?;
        debug!("{}: accepted {peer}", self.channel);
        Ok(Transport::from_stream(stream, peer, self.channel))
    }
}

// ── Internal tasks ────────────────────────────────────────────────────────────

/// Applies latency-oriented TCP options. Failures are logged and ignored;
/// the defaults still work, just slower.
fn tune_socket(stream: &TcpStream, channel: Channel) {
    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_nodelay(true) {
        warn!("{channel}: set_nodelay failed: {e}");
    }
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        warn!("{channel}: keepalive setup failed: {e}");
    }
    if let Err(e) = sock.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        warn!("{channel}: recv buffer sizing failed: {e}");
    }
    if let Err(e) = sock.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        warn!("{channel}: send buffer sizing failed: {e}");
    }
}

fn emit_disconnected(
    once: &AtomicBool,
    connected: &AtomicBool,
    events: &mpsc::UnboundedSender<TransportEvent>,
    channel: Channel,
) {
    connected.store(false, Ordering::Release);
    if !once.swap(true, Ordering::AcqRel) {
        debug!("{channel}: disconnected");
        let _ = events.send(TransportEvent::Disconnected);
    }
}

async fn write_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut writer_rx: mpsc::Receiver<Vec<u8>>,
    connected: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    disconnect_once: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
    channel: Channel,
) {
    while let Some(frame) = writer_rx.recv().await {
        if !connected.load(Ordering::Acquire) {
            break;
        }
        match write_half.write_all(&frame).await {
            Ok(()) => {
                stats.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
                stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("{channel}: write failed: {e}");
                emit_disconnected(&disconnect_once, &connected, &events, channel);
                break;
            }
        }
    }
    let _ = write_half.shutdown().await;
}

async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    msg_tx: mpsc::Sender<(MessageHeader, Bytes)>,
    connected: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    fault: Arc<Mutex<Option<FramingError>>>,
    disconnect_once: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
    channel: Channel,
) {
    let mut decoder = MessageDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let record_fault = |e: FramingError| {
        *fault.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
    };

    'outer: loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => {
                if let Err(e) = decoder.finish() {
                    warn!("{channel}: stream ended mid-message: {e}");
                    record_fault(e);
                }
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("{channel}: read failed: {e}");
                break;
            }
        };

        stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        decoder.extend(&chunk[..n]);

        loop {
            match decoder.next() {
                Ok(Some(msg)) => {
                    stats.messages_received.fetch_add(1, Ordering::Relaxed);
                    if msg_tx.send(msg).await.is_err() {
                        // Consumer dropped the stream; stop reading.
                        break 'outer;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{channel}: framing error, poisoning connection: {e}");
                    record_fault(e);
                    break 'outer;
                }
            }
        }
    }

    emit_disconnected(&disconnect_once, &connected, &events, channel);
    // Dropping msg_tx completes the message stream.
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair(channel: Channel) -> (Transport, Transport) {
        let listener = TransportListener::bind_addr("127.0.0.1:0".parse().unwrap(), channel)
            .await
            .expect("bind");
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(Transport::connect(addr, channel), listener.accept());
        (client.expect("connect"), server.expect("accept"))
    }

    #[tokio::test]
    async fn test_send_and_receive_one_message() {
        let (client, server) = connected_pair(Channel::Control).await;
        let mut messages = server.messages();

        client
            .send(MessageType::Heartbeat, MessageFlags::NONE, b"hb")
            .await
            .expect("send");

        let (header, payload) = messages.next().await.expect("message");
        assert_eq!(header.msg_type, MessageType::Heartbeat);
        assert_eq!(&payload[..], b"hb");
        assert_eq!(server.stats().messages_received(), 1);
        assert_eq!(client.stats().messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_single_sender_order_is_preserved() {
        let (client, server) = connected_pair(Channel::Video).await;
        let mut messages = server.messages();

        for i in 0u32..50 {
            client
                .send(
                    MessageType::VideoFrame,
                    MessageFlags::NONE,
                    &i.to_le_bytes(),
                )
                .await
                .expect("send");
        }

        for i in 0u32..50 {
            let (_, payload) = messages.next().await.expect("message");
            assert_eq!(payload.as_ref(), i.to_le_bytes());
        }
    }

    #[tokio::test]
    async fn test_concurrent_senders_deliver_intact_payloads() {
        let (client, server) = connected_pair(Channel::Control).await;
        let mut messages = server.messages();
        let client = Arc::new(client);

        let mut handles = Vec::new();
        for worker in 0u8..4 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                for i in 0u8..25 {
                    let payload = vec![worker; 64 + i as usize];
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

        // Interleaving is unconstrained, but each payload must be intact:
        // uniform bytes of the worker id.
        for _ in 0..100 {
            let (_, payload) = messages.next().await.expect("message");
            let first = payload[0];
            assert!(payload.iter().all(|&b| b == first));
        }
    }

    #[tokio::test]
    async fn test_peer_close_completes_stream_and_fails_sends() {
        let (client, server) = connected_pair(Channel::Control).await;
        let mut messages = server.messages();
        let mut events = server.events().expect("events");
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Connected(_))
        ));
        drop(client);

        assert!(messages.next().await.is_none(), "stream must complete");
        assert_eq!(events.recv().await, Some(TransportEvent::Disconnected));

        // Allow the state flip to settle, then sends must fail.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = server
            .send(MessageType::Heartbeat, MessageFlags::NONE, &[])
            .await;
        assert!(matches!(
            result,
            Err(TransportError::NotConnected) | Ok(())
        ));
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up_after_attempts() {
        // Nothing listens on this address.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let start = std::time::Instant::now();
        let result =
            Transport::connect_with_retry(addr, Channel::Control, 2, Duration::from_millis(50))
                .await;
        assert!(matches!(
            result,
            Err(TransportError::RetriesExhausted { attempts: 2, .. })
        ));
        // One inter-attempt delay must have elapsed.
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_stats_reset() {
        let (client, server) = connected_pair(Channel::Audio).await;
        let mut messages = server.messages();
        client
            .send(MessageType::AudioData, MessageFlags::NONE, &[0u8; 100])
            .await
            .unwrap();
        messages.next().await.unwrap();

        assert!(server.stats().bytes_received() > 0);
        server.stats().reset();
        assert_eq!(server.stats().bytes_received(), 0);
        assert_eq!(server.stats().messages_received(), 0);
    }

    #[tokio::test]
    #[should_panic(expected = "already taken")]
    async fn test_message_stream_is_not_restartable() {
        let (_client, server) = connected_pair(Channel::Control).await;
        let _first = server.messages();
        let _second = server.messages();
    }

    #[tokio::test]
    async fn test_corrupt_stream_records_a_framing_fault() {
        let listener = TransportListener::bind_addr("127.0.0.1:0".parse().unwrap(), Channel::Control)
            .await
            .expect("bind");
        let addr = listener.local_addr().unwrap();
        let (raw, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut raw = raw.expect("raw connect");
        let server = server.expect("accept");
        let mut messages = server.messages();

        // An 8-byte header with a type word outside the enumeration.
        let mut garbage = Vec::new();
        garbage.extend_from_slice(&0xBEEFu16.to_le_bytes());
        garbage.extend_from_slice(&0u16.to_le_bytes());
        garbage.extend_from_slice(&0u32.to_le_bytes());
        raw.write_all(&garbage).await.unwrap();

        // The stream completes and the fault names the corruption.
        assert!(messages.next().await.is_none());
        match server.fault() {
            Some(TransportError::Framing(FramingError::UnknownType(0xBEEF))) => {}
            other => panic!("expected framing fault, got {other:?}"),
        }
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn test_clean_close_leaves_no_fault() {
        let (client, server) = connected_pair(Channel::Control).await;
        let mut messages = server.messages();
        drop(client);
        assert!(messages.next().await.is_none());
        assert!(server.fault().is_none());
    }
}
