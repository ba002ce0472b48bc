//! UDP broadcast discovery.
//!
//! The host broadcasts `MACWINBRIDGE_DISCOVER` to the LAN on UDP 42099 and
//! waits for a companion to answer `MACWINBRIDGE_HERE|<machine-name>`. The
//! first valid response wins; its source address is the companion.
//!
//! The responder side binds the discovery port on a dedicated thread with
//! a short read timeout, so a shutdown flag is observed within half a
//! second. `WouldBlock`/`TimedOut` from the socket are normal idle returns,
//! not errors.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_core::protocol::message::DISCOVERY_PORT;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Request magic, sent by the searching side.
pub const DISCOVER_MAGIC: &[u8] = b"MACWINBRIDGE_DISCOVER";
/// Response magic, optionally followed by `|<machine-name>`.
pub const HERE_MAGIC: &[u8] = b"MACWINBRIDGE_HERE";

/// Default number of broadcast attempts within the overall timeout.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// A companion located by broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub addr: IpAddr,
    pub machine_name: Option<String>,
}

/// Broadcasts discovery requests and waits for the first valid response.
///
/// Performs up to `attempts` broadcasts, each waiting an equal share of
/// `timeout`. Returns `Ok(None)` when the full timeout elapses without a
/// response. Blocking; callers inside the runtime use `spawn_blocking`.
///
/// # Errors
///
/// [`DiscoveryError`] for socket setup failures (send/receive errors
/// during the wait are retried until the timeout).
pub fn discover(timeout: Duration, attempts: u32) -> Result<Option<DiscoveredPeer>, DiscoveryError> {
    discover_on(DISCOVERY_PORT, timeout, attempts)
}

/// [`discover`] against an explicit port (tests use an ephemeral one).
pub fn discover_on(
    port: u16,
    timeout: Duration,
    attempts: u32,
) -> Result<Option<DiscoveredPeer>, DiscoveryError> {
    discover_to(
        SocketAddr::from((Ipv4Addr::BROADCAST, port)),
        timeout,
        attempts,
    )
}

/// Directed probe against a known address. Used when broadcast is filtered
/// (some VPNs and container networks) and the companion address is already
/// configured, and by tests over loopback.
pub fn discover_to(
    dest: SocketAddr,
    timeout: Duration,
    attempts: u32,
) -> Result<Option<DiscoveredPeer>, DiscoveryError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|source| DiscoveryError::BindFailed {
        addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        source,
    })?;
    socket.set_broadcast(true)?;

    let attempts = attempts.max(1);
    let per_attempt = timeout / attempts;
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 512];

    for attempt in 1..=attempts {
        if let Err(e) = socket.send_to(DISCOVER_MAGIC, dest) {
            // A sendto failure (no route, firewall) is retryable.
            debug!("discovery broadcast attempt {attempt} failed: {e}");
        }

        let attempt_deadline = (Instant::now() + per_attempt).min(deadline);
        loop {
            let now = Instant::now();
            if now >= attempt_deadline {
                break;
            }
            socket.set_read_timeout(Some(attempt_deadline - now))?;
            match socket.recv_from(&mut buf) {
                Ok((len, src)) => {
                    if let Some(peer) = parse_here_response(&buf[..len], src.ip()) {
                        debug!("discovery: companion at {src} (attempt {attempt})");
                        return Ok(Some(peer));
                    }
                    // Not our magic; keep listening within the window.
                }
                Err(e) if is_timeout(&e) => break,
                Err(e) => {
                    // Transient socket errors (ICMP refusals on some
                    // stacks) stay inside the attempt window.
                    debug!("discovery recv error: {e}");
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
        if Instant::now() >= deadline {
            break;
        }
    }
    Ok(None)
}

/// Parses a `MACWINBRIDGE_HERE[|name]` datagram.
fn parse_here_response(datagram: &[u8], src: IpAddr) -> Option<DiscoveredPeer> {
    if !datagram.starts_with(HERE_MAGIC) {
        return None;
    }
    let rest = &datagram[HERE_MAGIC.len()..];
    let machine_name = rest
        .strip_prefix(b"|")
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .filter(|name| !name.is_empty());
    Some(DiscoveredPeer {
        addr: src,
        machine_name,
    })
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Responder ─────────────────────────────────────────────────────────────────

/// Companion-side responder answering discovery broadcasts with the local
/// machine name.
pub struct DiscoveryResponder {
    running: Arc<AtomicBool>,
    port: u16,
}

impl DiscoveryResponder {
    /// Binds UDP 42099 and starts the responder thread.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::BindFailed`] when the port is taken.
    pub fn start(machine_name: String) -> Result<Self, DiscoveryError> {
        Self::start_on(DISCOVERY_PORT, machine_name)
    }

    /// [`start`](Self::start) against an explicit port.
    pub fn start_on(port: u16, machine_name: String) -> Result<Self, DiscoveryError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket =
            UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_flag = Arc::clone(&running);

        std::thread::Builder::new()
            .name("bridge-discovery".to_string())
            .spawn(move || responder_loop(socket, machine_name, thread_flag))
            .map_err(DiscoveryError::Socket)?;

        info!("discovery responder listening on UDP {port}");
        Ok(Self { running, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Signals the responder thread to exit (observed within ~500 ms).
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The receive loop executed on the responder thread.
fn responder_loop(socket: UdpSocket, machine_name: String, running: Arc<AtomicBool>) {
    let mut reply = HERE_MAGIC.to_vec();
    if !machine_name.is_empty() {
        reply.push(b'|');
        reply.extend_from_slice(machine_name.as_bytes());
    }

    let mut buf = [0u8; 512];
    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                warn!("discovery responder recv error: {e}");
                continue;
            }
        };

        if &buf[..len] != DISCOVER_MAGIC {
            debug!("discovery responder: ignoring {len}-byte datagram from {src}");
            continue;
        }

        if let Err(e) = socket.send_to(&reply, src) {
            warn!("discovery responder: reply to {src} failed: {e}");
        }
    }
    info!("discovery responder stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_here_response() {
        let src: IpAddr = "192.168.7.4".parse().unwrap();
        let peer = parse_here_response(HERE_MAGIC, src).expect("valid");
        assert_eq!(peer.addr, src);
        assert_eq!(peer.machine_name, None);
    }

    #[test]
    fn test_parse_here_response_with_name() {
        let src: IpAddr = "10.0.0.2".parse().unwrap();
        let peer =
            parse_here_response(b"MACWINBRIDGE_HERE|mac-studio", src).expect("valid");
        assert_eq!(peer.machine_name.as_deref(), Some("mac-studio"));
    }

    #[test]
    fn test_parse_rejects_wrong_magic() {
        let src: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(parse_here_response(b"SOMETHING_ELSE", src), None);
        assert_eq!(parse_here_response(b"", src), None);
        // A prefix of the magic is not the magic.
        assert_eq!(parse_here_response(b"MACWINBRIDGE_H", src), None);
    }

    #[test]
    fn test_parse_tolerates_trailing_bytes_after_magic() {
        // Valid responses are any datagram whose first bytes are the magic.
        let src: IpAddr = "10.0.0.2".parse().unwrap();
        let peer = parse_here_response(b"MACWINBRIDGE_HERE|name-with|pipe", src).expect("valid");
        assert_eq!(peer.machine_name.as_deref(), Some("name-with|pipe"));
    }

    #[test]
    fn test_is_timeout_classification() {
        assert!(is_timeout(&std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "wb"
        )));
        assert!(is_timeout(&std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "to"
        )));
        assert!(!is_timeout(&std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "cr"
        )));
    }

    #[test]
    fn test_discover_times_out_without_responder() {
        // Ephemeral target port with nothing bound: must return None after
        // the full timeout, not an error.
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let start = Instant::now();
        let result = discover_on(port, Duration::from_millis(200), 2).expect("no socket error");
        assert_eq!(result, None);
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[test]
    fn test_responder_start_and_stop() {
        let probe = UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let responder =
            DiscoveryResponder::start_on(port, "test-host".to_string()).expect("bind");
        assert_eq!(responder.port(), port);
        responder.stop();
    }
}
