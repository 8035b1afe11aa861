//! Integration tests for CURVE-secured relaying
//!
//! Skipped when libzmq was built without CURVE support.

use std::io::Write;
use std::time::Duration;

use zmqhub_keystore::CurveKeypair;
use zmqhub_relay::{apply_curve_client, curve_supported, diagnostic_channel, DiagnosticOrigin, Hub, RelayContext};
use zmqhub_settings::Settings;

struct SecuredHub {
    _keyfile: tempfile::NamedTempFile,
    server: CurveKeypair,
    settings: Settings,
}

fn secured_settings() -> SecuredHub {
    let server = CurveKeypair::generate();
    let mut keyfile = tempfile::NamedTempFile::new().unwrap();
    writeln!(keyfile, "{}", server.secret_z85().unwrap()).unwrap();

    let mut settings = Settings::default();
    settings.relay.subscriber_endpoint = "tcp://127.0.0.1:*".to_string();
    settings.relay.publisher_endpoint = "tcp://127.0.0.1:*".to_string();
    settings.security.auth = true;
    settings.security.keyfile = Some(keyfile.path().to_path_buf());

    SecuredHub {
        _keyfile: keyfile,
        server,
        settings,
    }
}

fn curve_socket(
    ctx: &zmq::Context,
    kind: zmq::SocketType,
    endpoint: &str,
    server: &CurveKeypair,
) -> zmq::Socket {
    let socket = ctx.socket(kind).unwrap();
    socket.set_linger(0).unwrap();
    socket.set_rcvtimeo(100).unwrap();
    let client = CurveKeypair::generate();
    apply_curve_client(&socket, &client, &server.public_key_bytes()).unwrap();
    socket.connect(endpoint).unwrap();
    socket
}

#[tokio::test(flavor = "multi_thread")]
async fn test_curve_round_trip() {
    if !curve_supported() {
        return;
    }
    let secured = secured_settings();
    let ctx = RelayContext::new(secured.settings.clone()).unwrap();
    let (tx, _rx) = diagnostic_channel(64);
    let hub = Hub::start(&ctx, tx).unwrap();
    let endpoints = hub.endpoints().clone();

    let zmq_ctx = zmq::Context::new();
    let publisher = curve_socket(&zmq_ctx, zmq::PUB, &endpoints.subscriber, &secured.server);
    let subscriber = curve_socket(&zmq_ctx, zmq::SUB, &endpoints.publisher, &secured.server);
    subscriber.set_subscribe(b"").unwrap();

    let mut received = None;
    for _ in 0..100 {
        publisher.send("secret payload", 0).unwrap();
        if let Ok(msg) = subscriber.recv_bytes(0) {
            received = Some(msg);
            break;
        }
    }
    assert_eq!(received.as_deref(), Some(&b"secret payload"[..]));

    hub.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plaintext_client_receives_nothing() {
    if !curve_supported() {
        return;
    }
    let secured = secured_settings();
    let ctx = RelayContext::new(secured.settings.clone()).unwrap();
    let (tx, _rx) = diagnostic_channel(64);
    let hub = Hub::start(&ctx, tx).unwrap();
    let endpoints = hub.endpoints().clone();

    let zmq_ctx = zmq::Context::new();
    let publisher = curve_socket(&zmq_ctx, zmq::PUB, &endpoints.subscriber, &secured.server);

    let plain = zmq_ctx.socket(zmq::SUB).unwrap();
    plain.set_linger(0).unwrap();
    plain.set_rcvtimeo(50).unwrap();
    plain.connect(&endpoints.publisher).unwrap();
    plain.set_subscribe(b"").unwrap();

    for _ in 0..10 {
        publisher.send("secret payload", 0).unwrap();
        assert!(plain.recv_bytes(0).is_err());
    }

    hub.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capture_tap_authenticates_with_relay_key() {
    if !curve_supported() {
        return;
    }
    let mut secured = secured_settings();
    secured.settings.capture.debug = true;
    let ctx = RelayContext::new(secured.settings.clone()).unwrap();
    let (tx, mut rx) = diagnostic_channel(256);
    let hub = Hub::start(&ctx, tx).unwrap();

    let zmq_ctx = zmq::Context::new();
    let publisher = curve_socket(&zmq_ctx, zmq::PUB, &hub.endpoints().subscriber, &secured.server);

    let seen = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            publisher.send(&b"\x01"[..], 0).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            while let Ok(line) = rx.try_recv() {
                if line.origin == DiagnosticOrigin::Capture {
                    return line.text;
                }
            }
        }
    })
    .await
    .expect("capture tap never received a message");
    assert_eq!(seen, "ZMQ: Too short datalen: 1");

    hub.shutdown().await.unwrap();
}
