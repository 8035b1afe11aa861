//! Per-task control sockets
//!
//! Each long-running task gets a connected pair of `inproc://` PAIR sockets.
//! The task polls its end next to its data socket, the hub keeps the other end
//! and sends [`TERMINATE`] to stop it. The forwarding loop hands its end to the
//! steerable proxy, which understands the same command.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;
use zmqhub_core::Result;

use crate::transport;

/// Command understood by the steerable proxy and by every tap
pub const TERMINATE: &[u8] = b"TERMINATE";

static NEXT_CHANNEL: AtomicUsize = AtomicUsize::new(0);

/// Hub side of a control channel
pub struct ShutdownTrigger {
    name: String,
    socket: zmq::Socket,
}

impl ShutdownTrigger {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the task to stop. Never blocks.
    pub fn trigger(&self) {
        if let Err(e) = self.socket.send(TERMINATE, zmq::DONTWAIT) {
            // The task already returned and closed its end
            debug!("Control channel {} not accepting: {}", self.name, e);
        }
    }
}

/// Task side of a control channel
pub struct ShutdownListener {
    socket: zmq::Socket,
}

/// What woke a task up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Data,
    Shutdown,
}

impl ShutdownListener {
    /// Block until `data` is readable or a stop was requested.
    ///
    /// A stop request wins over pending data.
    pub(crate) fn wait(&self, data: &zmq::Socket) -> std::result::Result<Wake, zmq::Error> {
        loop {
            let mut items = [
                self.socket.as_poll_item(zmq::POLLIN),
                data.as_poll_item(zmq::POLLIN),
            ];
            match zmq::poll(&mut items, -1) {
                Ok(_) => {}
                Err(zmq::Error::EINTR) => continue,
                Err(e) => return Err(e),
            }

            if items[0].is_readable() {
                return Ok(Wake::Shutdown);
            }
            if items[1].is_readable() {
                return Ok(Wake::Data);
            }
        }
    }

    pub(crate) fn into_socket(self) -> zmq::Socket {
        self.socket
    }
}

/// Create a connected control channel named after the task it stops
pub fn control_channel(ctx: &zmq::Context, name: &str) -> Result<(ShutdownTrigger, ShutdownListener)> {
    let endpoint = format!(
        "inproc://zmqhub-control-{}-{}",
        name,
        NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed)
    );

    let trigger = ctx
        .socket(zmq::PAIR)
        .map_err(|e| transport("create control socket", e))?;
    trigger.set_linger(0).map_err(|e| transport("set linger", e))?;
    trigger
        .bind(&endpoint)
        .map_err(|e| transport("bind control socket", e))?;

    let listener = ctx
        .socket(zmq::PAIR)
        .map_err(|e| transport("create control socket", e))?;
    listener.set_linger(0).map_err(|e| transport("set linger", e))?;
    listener
        .connect(&endpoint)
        .map_err(|e| transport("connect control socket", e))?;

    Ok((
        ShutdownTrigger {
            name: name.to_string(),
            socket: trigger,
        },
        ShutdownListener { socket: listener },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_wakes_listener() {
        let ctx = zmq::Context::new();
        let (trigger, listener) = control_channel(&ctx, "test").unwrap();

        let data = ctx.socket(zmq::PAIR).unwrap();
        data.bind("inproc://idle-data").unwrap();

        trigger.trigger();
        assert_eq!(listener.wait(&data).unwrap(), Wake::Shutdown);
        assert_eq!(trigger.name(), "test");
    }

    #[test]
    fn test_data_wakes_listener() {
        let ctx = zmq::Context::new();
        let (_trigger, listener) = control_channel(&ctx, "test").unwrap();

        let data = ctx.socket(zmq::PAIR).unwrap();
        data.bind("inproc://busy-data").unwrap();
        let peer = ctx.socket(zmq::PAIR).unwrap();
        peer.connect("inproc://busy-data").unwrap();
        peer.send("ping", 0).unwrap();

        assert_eq!(listener.wait(&data).unwrap(), Wake::Data);
        assert_eq!(data.recv_bytes(0).unwrap(), b"ping");
    }

    #[test]
    fn test_trigger_after_listener_dropped() {
        let ctx = zmq::Context::new();
        let (trigger, listener) = control_channel(&ctx, "gone").unwrap();
        drop(listener);
        trigger.trigger();
    }
}
