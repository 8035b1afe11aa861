//! Relay core: XSUB ↔ XPUB forwarding
//!
//! Forwarding is libzmq's steerable proxy. It moves whole multi-part messages
//! in order per direction and carries subscription frames from the XPUB side
//! up to the publishers behind the XSUB side. Message bodies are never
//! inspected.

use tracing::{debug, error, info};

use zmqhub_core::{Endpoint, EndpointRole, HubError, Result};

use crate::context::RelayContext;
use crate::monitor::EVENT_ALL;
use crate::security::apply_curve_server;
use crate::shutdown::ShutdownListener;
use crate::transport;

/// Addresses the relay actually listens on (wildcard ports resolved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundEndpoints {
    pub subscriber: String,
    pub publisher: String,
}

/// The two relay sockets and their endpoints
pub struct RelayCore {
    frontend: zmq::Socket,
    backend: zmq::Socket,
    subscriber: Endpoint,
    publisher: Endpoint,
}

impl RelayCore {
    /// Create both sockets and apply transport security
    pub fn new(ctx: &RelayContext) -> Result<Self> {
        let settings = ctx.settings();
        let subscriber = settings.subscriber_endpoint()?;
        let publisher = settings.publisher_endpoint()?;

        let frontend = ctx
            .zmq()
            .socket(zmq::XSUB)
            .map_err(|e| transport("create XSUB socket", e))?;
        let backend = ctx
            .zmq()
            .socket(zmq::XPUB)
            .map_err(|e| transport("create XPUB socket", e))?;

        for socket in [&frontend, &backend] {
            socket.set_linger(0).map_err(|e| transport("set linger", e))?;
        }

        if let Some(keypair) = ctx.credential() {
            // Both sides are CURVE servers with the same key
            apply_curve_server(&frontend, keypair)?;
            apply_curve_server(&backend, keypair)?;
            debug!("CURVE enabled on both endpoints");
        }

        Ok(Self {
            frontend,
            backend,
            subscriber,
            publisher,
        })
    }

    pub fn endpoint(&self, role: EndpointRole) -> &Endpoint {
        match role {
            EndpointRole::Subscriber => &self.subscriber,
            EndpointRole::Publisher => &self.publisher,
        }
    }

    fn socket(&self, role: EndpointRole) -> &zmq::Socket {
        match role {
            EndpointRole::Subscriber => &self.frontend,
            EndpointRole::Publisher => &self.backend,
        }
    }

    /// Start lifecycle monitoring of one side and return the connected
    /// event channel.
    ///
    /// Must be called before the sockets move to the forwarding task.
    pub fn attach_monitor(&self, ctx: &RelayContext, role: EndpointRole) -> Result<zmq::Socket> {
        let channel = format!("inproc://monitor-{}", role.label());
        self.socket(role)
            .monitor(&channel, EVENT_ALL)
            .map_err(|e| transport("attach monitor", e))?;

        let events = ctx
            .zmq()
            .socket(zmq::PAIR)
            .map_err(|e| transport("create monitor socket", e))?;
        events.set_linger(0).map_err(|e| transport("set linger", e))?;
        events
            .connect(&channel)
            .map_err(|e| transport("connect monitor socket", e))?;
        Ok(events)
    }

    /// Bind both endpoints, subscriber-facing first
    pub fn bind(&self) -> Result<BoundEndpoints> {
        let subscriber = bind(&self.frontend, &self.subscriber)?;
        let publisher = bind(&self.backend, &self.publisher)?;
        Ok(BoundEndpoints {
            subscriber,
            publisher,
        })
    }

    /// Forward between both sockets until `control` receives TERMINATE.
    ///
    /// Any other return from the proxy is a fatal transport failure.
    pub fn run_forwarding_loop(self, control: ShutdownListener) -> Result<()> {
        let Self {
            mut frontend,
            mut backend,
            ..
        } = self;
        let mut control = control.into_socket();

        loop {
            match zmq::proxy_steerable(&mut frontend, &mut backend, &mut control) {
                Ok(()) => {
                    info!("Relay forwarding stopped");
                    return Ok(());
                }
                // A signal landed on this thread; nothing was lost
                Err(zmq::Error::EINTR) => continue,
                Err(e) => {
                    error!("Relay forwarding failed: {}", e);
                    return Err(transport("forwarding", e));
                }
            }
        }
    }
}

/// Bind `socket` to `endpoint`, returning the resolved address
pub fn bind(socket: &zmq::Socket, endpoint: &Endpoint) -> Result<String> {
    socket.bind(&endpoint.address).map_err(|e| HubError::BindError {
        endpoint: endpoint.address.clone(),
        reason: e.to_string(),
    })?;

    let resolved = match socket.get_last_endpoint() {
        Ok(Ok(addr)) => addr,
        _ => endpoint.address.clone(),
    };
    info!("{} task listening on {}", endpoint.role.task_name(), resolved);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zmqhub_settings::Settings;

    fn local_settings() -> Settings {
        let mut settings = Settings::default();
        settings.relay.subscriber_endpoint = "tcp://127.0.0.1:*".to_string();
        settings.relay.publisher_endpoint = "tcp://127.0.0.1:*".to_string();
        settings
    }

    #[test]
    fn test_bind_resolves_wildcard() {
        let ctx = RelayContext::new(local_settings()).unwrap();
        let relay = RelayCore::new(&ctx).unwrap();

        let bound = relay.bind().unwrap();
        assert!(bound.subscriber.starts_with("tcp://127.0.0.1:"));
        assert!(!bound.subscriber.ends_with('*'));
        assert_ne!(bound.subscriber, bound.publisher);
    }

    #[test]
    fn test_bind_conflict_is_bind_error() {
        let ctx = zmq::Context::new();
        let holder = ctx.socket(zmq::PUB).unwrap();
        holder.bind("tcp://127.0.0.1:*").unwrap();
        let taken = holder.get_last_endpoint().unwrap().unwrap();

        let socket = ctx.socket(zmq::XSUB).unwrap();
        let endpoint = Endpoint::new(
            taken.clone(),
            EndpointRole::Subscriber,
            zmqhub_core::EndpointSecurity::None,
        )
        .unwrap();

        match bind(&socket, &endpoint) {
            Err(HubError::BindError { endpoint, .. }) => assert_eq!(endpoint, taken),
            other => panic!("expected BindError, got {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_roles() {
        let mut settings = local_settings();
        settings.relay.publisher_endpoint = "ipc:///tmp/zmqhub-test-endpoints".to_string();
        let ctx = RelayContext::new(settings).unwrap();
        let relay = RelayCore::new(&ctx).unwrap();

        assert_eq!(relay.endpoint(EndpointRole::Subscriber).role, EndpointRole::Subscriber);
        assert_eq!(
            relay.endpoint(EndpointRole::Publisher).address,
            "ipc:///tmp/zmqhub-test-endpoints"
        );
    }
}
