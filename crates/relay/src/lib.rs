//! zmqhub Relay
//!
//! Transparent XSUB/XPUB relay between the subscriber-facing and
//! publisher-facing buses, with optional diagnostic taps:
//!
//! - **RelayCore**: binds both endpoints and forwards every message unmodified,
//!   including subscription frames travelling upstream
//! - **ConnectionMonitor**: renders connection lifecycle events of one endpoint
//! - **CaptureTap**: decodes the envelope header of every published message and
//!   optionally appends it to a capture log
//!
//! Every task owns its sockets. The only shared state is the read-only
//! [`RelayContext`]; taps talk to the outside world through the diagnostic
//! channel and are stopped through their private control socket.

mod capture;
mod context;
mod diagnostics;
mod hub;
mod monitor;
mod proxy;
mod security;
mod shutdown;

pub use capture::{connect_capture_socket, CaptureLog, CaptureOutcome, CaptureStats, CaptureTap, DELIMITER};
pub use context::RelayContext;
pub use diagnostics::{
    diagnostic_channel, run_sink, DiagnosticLine, DiagnosticOrigin, DiagnosticSender,
    DIAGNOSTIC_QUEUE_DEPTH,
};
pub use hub::{Hub, RunningHub};
pub use monitor::{
    render, ConnectionEvent, ConnectionEventKind, ConnectionMonitor, EventSource, PeerResolver,
    SocketPeerResolver, ZmqEventSource, EVENT_ALL,
};
pub use proxy::{bind, BoundEndpoints, RelayCore};
pub use security::{apply_curve_client, apply_curve_server, curve_supported};
pub use shutdown::{control_channel, ShutdownListener, ShutdownTrigger, TERMINATE};

use zmqhub_core::HubError;

/// Wrap a libzmq failure with what was being attempted
pub(crate) fn transport(action: &str, err: zmq::Error) -> HubError {
    HubError::Transport(format!("{}: {}", action, err))
}
