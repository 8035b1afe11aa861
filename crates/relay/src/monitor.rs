//! Connection lifecycle monitor
//!
//! libzmq publishes socket events on an `inproc://` PAIR channel attached with
//! `zmq_socket_monitor`. Each event is a two-frame message: a 6-byte frame
//! holding the native-endian event code (`u16`) and value (`u32`), then the
//! endpoint the event happened on.

use std::net::SocketAddr;

use tracing::{debug, warn};

use zmqhub_core::{EndpointRole, HubError, Result};

use crate::diagnostics::{DiagnosticOrigin, DiagnosticSender};
use crate::shutdown::{ShutdownListener, Wake};

/// Subscribe to every event kind
pub const EVENT_ALL: i32 = 0xffff;

const EVENT_ACCEPTED: u16 = 0x0020;
const EVENT_DISCONNECTED: u16 = 0x0200;
const EVENT_HANDSHAKE_SUCCEEDED: u16 = 0x1000;
const EVENT_HANDSHAKE_FAILED_PROTOCOL: u16 = 0x2000;
const EVENT_HANDSHAKE_FAILED_AUTH: u16 = 0x4000;

/// Size of the first event frame
const EVENT_HEADER_LEN: usize = 6;

/// Event kinds with their own rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEventKind {
    Accepted,
    HandshakeSucceeded,
    HandshakeFailedProtocol,
    HandshakeFailedAuth,
    Disconnected,
    Other(u16),
}

impl ConnectionEventKind {
    pub fn from_raw(code: u16) -> Self {
        match code {
            EVENT_ACCEPTED => Self::Accepted,
            EVENT_HANDSHAKE_SUCCEEDED => Self::HandshakeSucceeded,
            EVENT_HANDSHAKE_FAILED_PROTOCOL => Self::HandshakeFailedProtocol,
            EVENT_HANDSHAKE_FAILED_AUTH => Self::HandshakeFailedAuth,
            EVENT_DISCONNECTED => Self::Disconnected,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            Self::Accepted => EVENT_ACCEPTED,
            Self::HandshakeSucceeded => EVENT_HANDSHAKE_SUCCEEDED,
            Self::HandshakeFailedProtocol => EVENT_HANDSHAKE_FAILED_PROTOCOL,
            Self::HandshakeFailedAuth => EVENT_HANDSHAKE_FAILED_AUTH,
            Self::Disconnected => EVENT_DISCONNECTED,
            Self::Other(code) => code,
        }
    }
}

/// One lifecycle transition observed on an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    pub value: u32,
    pub endpoint: String,
}

impl ConnectionEvent {
    pub fn new(kind: ConnectionEventKind, value: u32, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            value,
            endpoint: endpoint.into(),
        }
    }

    /// Parse the two frames of a monitor message
    pub fn parse(frames: &[Vec<u8>]) -> Result<Self> {
        let [header, endpoint] = frames else {
            return Err(HubError::Transport(format!(
                "monitor event has {} frames, expected 2",
                frames.len()
            )));
        };
        if header.len() < EVENT_HEADER_LEN {
            return Err(HubError::Transport(format!(
                "monitor event header is {} bytes, expected {}",
                header.len(),
                EVENT_HEADER_LEN
            )));
        }

        let code = u16::from_ne_bytes([header[0], header[1]]);
        let value = u32::from_ne_bytes([header[2], header[3], header[4], header[5]]);
        Ok(Self {
            kind: ConnectionEventKind::from_raw(code),
            value,
            endpoint: String::from_utf8_lossy(endpoint).into_owned(),
        })
    }

    /// Raw connection handle carried by an `Accepted` event
    pub fn connection_handle(&self) -> Option<i32> {
        match self.kind {
            ConnectionEventKind::Accepted => Some(self.value as i32).filter(|fd| *fd != -1),
            _ => None,
        }
    }
}

/// Render an event as one diagnostic line
pub fn render(event: &ConnectionEvent, peer: Option<SocketAddr>) -> String {
    let endpoint = &event.endpoint;
    match event.kind {
        ConnectionEventKind::Accepted => match peer {
            Some(peer) => format!("{}:{} connected on {}", peer.ip(), peer.port(), endpoint),
            None => format!("connected on {}", endpoint),
        },
        ConnectionEventKind::HandshakeSucceeded => format!("Handshake succeeded on {}", endpoint),
        ConnectionEventKind::HandshakeFailedProtocol => {
            format!("Handshake protocol failure on {}", endpoint)
        }
        ConnectionEventKind::HandshakeFailedAuth => format!("Handshake failed auth on {}", endpoint),
        ConnectionEventKind::Disconnected => format!("Client disconnected on {}", endpoint),
        ConnectionEventKind::Other(code) => format!("event: 0x{:x}", code),
    }
}

/// Resolves the remote address behind a connection handle
pub trait PeerResolver: Send {
    fn resolve(&self, handle: i32) -> Option<SocketAddr>;
}

impl<F> PeerResolver for F
where
    F: Fn(i32) -> Option<SocketAddr> + Send,
{
    fn resolve(&self, handle: i32) -> Option<SocketAddr> {
        self(handle)
    }
}

/// [`PeerResolver`] calling `getpeername` on the accepted descriptor.
///
/// The descriptor belongs to libzmq and may already be closed when the event
/// is read; the lookup then fails and the line is rendered without a peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketPeerResolver;

impl PeerResolver for SocketPeerResolver {
    #[cfg(unix)]
    fn resolve(&self, handle: i32) -> Option<SocketAddr> {
        use nix::sys::socket::{getpeername, SockaddrLike, SockaddrStorage};
        use std::net::{SocketAddrV4, SocketAddrV6};

        if handle < 0 {
            return None;
        }
        let peer = getpeername::<SockaddrStorage>(handle).ok()?;
        if let Some(v4) = peer.as_sockaddr_in() {
            return Some(SocketAddr::V4(SocketAddrV4::from(*v4)));
        }
        if let Some(v6) = peer.as_sockaddr_in6() {
            return Some(SocketAddr::V6(SocketAddrV6::from(*v6)));
        }
        debug!("Peer of handle {} has family {:?}", handle, peer.family());
        None
    }

    #[cfg(not(unix))]
    fn resolve(&self, _handle: i32) -> Option<SocketAddr> {
        None
    }
}

/// Source of connection events
pub trait EventSource {
    /// Next event; `Ok(None)` once a stop was requested.
    ///
    /// Fails with [`HubError::ChannelClosed`] when the channel is torn down.
    fn read_event(&mut self) -> Result<Option<ConnectionEvent>>;
}

/// [`EventSource`] reading a libzmq monitor channel
pub struct ZmqEventSource {
    socket: zmq::Socket,
    control: ShutdownListener,
}

impl ZmqEventSource {
    pub fn new(socket: zmq::Socket, control: ShutdownListener) -> Self {
        Self { socket, control }
    }
}

impl EventSource for ZmqEventSource {
    fn read_event(&mut self) -> Result<Option<ConnectionEvent>> {
        match self.control.wait(&self.socket) {
            Ok(Wake::Shutdown) => return Ok(None),
            Ok(Wake::Data) => {}
            Err(e) => {
                debug!("Monitor channel poll failed: {}", e);
                return Err(HubError::ChannelClosed);
            }
        }

        let frames = self.socket.recv_multipart(0).map_err(|e| {
            debug!("Monitor channel receive failed: {}", e);
            HubError::ChannelClosed
        })?;
        ConnectionEvent::parse(&frames).map(Some)
    }
}

/// Renders the lifecycle events of one endpoint
pub struct ConnectionMonitor<S, R> {
    role: EndpointRole,
    source: S,
    resolver: R,
    diagnostics: DiagnosticSender,
}

impl<S: EventSource, R: PeerResolver> ConnectionMonitor<S, R> {
    pub fn new(role: EndpointRole, source: S, resolver: R, diagnostics: DiagnosticSender) -> Self {
        Self {
            role,
            source,
            resolver,
            diagnostics,
        }
    }

    /// Render events until stopped or the channel closes.
    ///
    /// Returns the number of rendered events. Channel teardown ends this
    /// monitor only.
    pub fn run(mut self) -> u64 {
        let origin = DiagnosticOrigin::Monitor(self.role);
        let mut rendered = 0u64;

        loop {
            let event = match self.source.read_event() {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("Monitor {} stopping", self.role);
                    break;
                }
                Err(HubError::ChannelClosed) => {
                    debug!("Monitor {} channel closed", self.role);
                    break;
                }
                Err(e) => {
                    warn!("Monitor {} skipping event: {}", self.role, e);
                    continue;
                }
            };

            let peer = event
                .connection_handle()
                .and_then(|handle| self.resolver.resolve(handle));
            if !self.diagnostics.emit(origin, render(&event, peer)) {
                debug!("Diagnostic sink closed, monitor {} stopping", self.role);
                break;
            }
            rendered += 1;
        }

        rendered
    }
}
