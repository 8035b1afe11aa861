//! Hub orchestration
//!
//! Builds every socket up front, then moves each one into its own blocking
//! task. Nothing is spawned until all fallible setup succeeded, so a failed
//! start leaves no threads behind.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zmqhub_core::{EndpointRole, HubError, Result};

use crate::capture::{connect_capture_socket, CaptureLog, CaptureTap};
use crate::context::RelayContext;
use crate::diagnostics::DiagnosticSender;
use crate::monitor::{ConnectionMonitor, SocketPeerResolver, ZmqEventSource};
use crate::proxy::{BoundEndpoints, RelayCore};
use crate::shutdown::{control_channel, ShutdownTrigger};

/// Entry point for starting the relay and its taps
pub struct Hub;

impl Hub {
    /// Bind the relay and start forwarding.
    ///
    /// With debug taps enabled this also starts one connection monitor per
    /// endpoint and the capture tap. Monitors are attached before binding so
    /// the first connection is observed.
    pub fn start(ctx: &RelayContext, diagnostics: DiagnosticSender) -> Result<RunningHub> {
        let settings = ctx.settings();
        let relay = RelayCore::new(ctx)?;

        let mut monitors = Vec::new();
        let mut capture_log = None;
        if settings.capture.debug {
            if let Some(path) = &settings.capture.log_file {
                capture_log = Some(CaptureLog::open(path)?);
            }
            for role in [EndpointRole::Subscriber, EndpointRole::Publisher] {
                monitors.push((role, relay.attach_monitor(ctx, role)?));
            }
        }

        let endpoints = relay.bind()?;

        let capture_socket = if settings.capture.debug {
            Some(connect_capture_socket(ctx, &endpoints.publisher)?)
        } else {
            None
        };

        let mut triggers = Vec::new();
        let mut taps: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();

        let mut monitor_tasks = Vec::new();
        for (role, events) in monitors {
            let (trigger, listener) = control_channel(ctx.zmq(), &format!("monitor-{}", role.label()))?;
            triggers.push(trigger);
            monitor_tasks.push((role, ZmqEventSource::new(events, listener)));
        }

        let capture_task = match capture_socket {
            Some(socket) => {
                let (trigger, listener) = control_channel(ctx.zmq(), "capture")?;
                triggers.push(trigger);
                Some((socket, listener))
            }
            None => None,
        };

        let (relay_trigger, relay_listener) = control_channel(ctx.zmq(), "relay")?;

        // Setup is complete; from here on nothing can fail
        for (role, source) in monitor_tasks {
            let monitor =
                ConnectionMonitor::new(role, source, SocketPeerResolver, diagnostics.clone());
            let handle = tokio::task::spawn_blocking(move || {
                let rendered = monitor.run();
                debug!("Monitor {} rendered {} events", role, rendered);
                Ok(())
            });
            taps.push((format!("monitor-{}", role.label()), handle));
        }

        if let Some((socket, listener)) = capture_task {
            let tap = CaptureTap::new(ctx.decoder(), capture_log, diagnostics.clone());
            let handle = tokio::task::spawn_blocking(move || tap.run(socket, listener).map(|_| ()));
            taps.push(("capture".to_string(), handle));
        }

        let relay_handle = tokio::task::spawn_blocking(move || relay.run_forwarding_loop(relay_listener));
        triggers.push(relay_trigger);

        info!(
            "Relay started: {} -> {}",
            endpoints.subscriber, endpoints.publisher
        );

        Ok(RunningHub {
            endpoints,
            relay: Some(relay_handle),
            taps,
            triggers,
        })
    }
}

/// Handle to a started relay
pub struct RunningHub {
    endpoints: BoundEndpoints,
    relay: Option<JoinHandle<Result<()>>>,
    taps: Vec<(String, JoinHandle<Result<()>>)>,
    triggers: Vec<ShutdownTrigger>,
}

impl RunningHub {
    /// Resolved addresses of both endpoints
    pub fn endpoints(&self) -> &BoundEndpoints {
        &self.endpoints
    }

    /// Number of diagnostic taps running next to the relay
    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    /// Resolve once the forwarding loop ends on its own.
    ///
    /// Cancel safe: the relay keeps running if this future is dropped.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(handle) = self.relay.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        self.relay = None;
        flatten("relay", joined)
    }

    /// Stop every task and wait for all of them.
    ///
    /// Tap failures are logged; the relay's own result is returned.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down relay");
        for trigger in &self.triggers {
            debug!("Stopping {}", trigger.name());
            trigger.trigger();
        }

        let relay_result = match self.relay.take() {
            Some(handle) => flatten("relay", handle.await),
            None => Ok(()),
        };

        for (name, handle) in self.taps.drain(..) {
            if let Err(e) = flatten(&name, handle.await) {
                warn!("Tap {} ended with error: {}", name, e);
            }
        }

        relay_result
    }
}

fn flatten(name: &str, joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| HubError::Transport(format!("{} task failed: {}", name, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use zmqhub_settings::Settings;

    use crate::diagnostics::diagnostic_channel;

    fn local_settings() -> Settings {
        let mut settings = Settings::default();
        settings.relay.subscriber_endpoint = "tcp://127.0.0.1:*".to_string();
        settings.relay.publisher_endpoint = "tcp://127.0.0.1:*".to_string();
        settings
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let ctx = RelayContext::new(local_settings()).unwrap();
        let (tx, _rx) = diagnostic_channel(16);

        let hub = Hub::start(&ctx, tx).unwrap();
        assert_eq!(hub.tap_count(), 0);
        assert!(hub.endpoints().subscriber.starts_with("tcp://127.0.0.1:"));

        tokio::time::timeout(Duration::from_secs(5), hub.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_debug_starts_taps() {
        let mut settings = local_settings();
        settings.capture.debug = true;
        let ctx = RelayContext::new(settings).unwrap();
        let (tx, _rx) = diagnostic_channel(16);

        let hub = Hub::start(&ctx, tx).unwrap();
        assert_eq!(hub.tap_count(), 3);

        tokio::time::timeout(Duration::from_secs(5), hub.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_is_cancel_safe() {
        let ctx = RelayContext::new(local_settings()).unwrap();
        let (tx, _rx) = diagnostic_channel(16);
        let mut hub = Hub::start(&ctx, tx).unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), hub.wait()).await;
        assert!(waited.is_err(), "relay should still be running");

        tokio::time::timeout(Duration::from_secs(5), hub.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_with_stalled_sink() {
        let mut settings = local_settings();
        settings.capture.debug = true;
        let ctx = RelayContext::new(settings).unwrap();
        // Never drained: every tap overflows it right away
        let (tx, _rx) = diagnostic_channel(1);
        let hub = Hub::start(&ctx, tx).unwrap();

        let zmq_ctx = zmq::Context::new();
        let publisher = zmq_ctx.socket(zmq::PUB).unwrap();
        publisher.set_linger(0).unwrap();
        publisher.connect(&hub.endpoints().subscriber).unwrap();
        for _ in 0..20 {
            publisher.send(&b"\x01"[..], 0).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::timeout(Duration::from_secs(3), hub.shutdown())
            .await
            .expect("shutdown must not wait on a stalled sink")
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_capture_log_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = local_settings();
        settings.capture.debug = true;
        settings.capture.log_file = Some(dir.path().join("absent").join("capture.log"));
        let ctx = RelayContext::new(settings).unwrap();
        let (tx, _rx) = diagnostic_channel(16);

        assert!(matches!(
            Hub::start(&ctx, tx),
            Err(HubError::CaptureLogUnavailable { .. })
        ));
    }
}
