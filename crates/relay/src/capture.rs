//! Capture tap
//!
//! A separate SUB connection to the publisher-facing endpoint. It receives
//! its own copy of every published message, so nothing it does can slow the
//! forwarding path: if it falls behind, libzmq drops messages for this
//! subscriber only.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use zmqhub_core::{EnvelopeDecoder, EnvelopeHeader, HubError, Result};

use crate::context::RelayContext;
use crate::diagnostics::{DiagnosticOrigin, DiagnosticSender};
use crate::security::apply_curve_client;
use crate::shutdown::{ShutdownListener, Wake};
use crate::transport;

/// Line written before every captured envelope
pub const DELIMITER: &[u8] = b"--------\n";

/// Append-only capture log
pub struct CaptureLog {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl CaptureLog {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| HubError::CaptureLogUnavailable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!("Capturing to {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    /// Append one delimiter + raw envelope record and flush it
    pub fn append(&mut self, raw: &[u8]) -> io::Result<()> {
        self.writer.write_all(DELIMITER)?;
        self.writer.write_all(raw)?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended since opening
    pub fn records(&self) -> u64 {
        self.records
    }
}

/// Result of processing one captured message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Decoded(EnvelopeHeader),
    TooShort(usize),
}

/// Counters reported when the tap stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub decoded: u64,
    pub dropped: u64,
    pub logged: u64,
}

/// Decodes and optionally logs every published message
pub struct CaptureTap {
    decoder: Arc<dyn EnvelopeDecoder>,
    log: Option<CaptureLog>,
    diagnostics: DiagnosticSender,
    stats: CaptureStats,
}

impl CaptureTap {
    pub fn new(
        decoder: Arc<dyn EnvelopeDecoder>,
        log: Option<CaptureLog>,
        diagnostics: DiagnosticSender,
    ) -> Self {
        Self {
            decoder,
            log,
            diagnostics,
            stats: CaptureStats::default(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Handle the first frame of one message
    pub fn process(&mut self, raw: &[u8]) -> CaptureOutcome {
        let header = match self.decoder.decode(raw) {
            Ok(header) => header,
            Err(e) => {
                debug!("Dropping captured message: {}", e);
                self.stats.dropped += 1;
                self.emit(format!("ZMQ: Too short datalen: {}", raw.len()));
                return CaptureOutcome::TooShort(raw.len());
            }
        };

        self.stats.decoded += 1;
        trace!(flags = ?header.csp_flags(), "captured {}", hex::encode(raw));
        self.emit(header.to_string());

        if let Some(log) = self.log.as_mut() {
            match log.append(raw) {
                Ok(()) => self.stats.logged += 1,
                Err(e) => warn!("Failed to write capture log {:?}: {}", log.path(), e),
            }
        }

        CaptureOutcome::Decoded(header)
    }

    fn emit(&self, text: String) {
        self.diagnostics.emit(DiagnosticOrigin::Capture, text);
    }

    /// Capture until stopped.
    ///
    /// Receive errors are reported and skipped; only a failing poll ends the
    /// tap with an error.
    pub fn run(mut self, socket: zmq::Socket, control: ShutdownListener) -> Result<CaptureStats> {
        loop {
            match control.wait(&socket) {
                Ok(Wake::Shutdown) => break,
                Ok(Wake::Data) => {}
                Err(e) => return Err(transport("capture poll", e)),
            }

            let frame = match socket.recv_bytes(0) {
                Ok(frame) => frame,
                Err(e) => {
                    self.emit(format!("ZMQ: {}", e));
                    continue;
                }
            };

            self.process(&frame);
            // Only the first frame carries the envelope
            drain_parts(&socket);
        }

        debug!(
            "Capture stopped: {} decoded, {} dropped, {} logged",
            self.stats.decoded, self.stats.dropped, self.stats.logged
        );
        Ok(self.stats)
    }
}

/// Discard the remaining parts of the current message without blocking
fn drain_parts(socket: &zmq::Socket) {
    while socket.get_rcvmore().unwrap_or(false) {
        if socket.recv_bytes(zmq::DONTWAIT).is_err() {
            break;
        }
    }
}

/// Connect the capture subscriber to the publisher-facing endpoint
pub fn connect_capture_socket(ctx: &RelayContext, endpoint: &str) -> Result<zmq::Socket> {
    let socket = ctx
        .zmq()
        .socket(zmq::SUB)
        .map_err(|e| transport("create capture socket", e))?;
    socket.set_linger(0).map_err(|e| transport("set linger", e))?;

    if let Some(keypair) = ctx.credential() {
        apply_curve_client(&socket, keypair, &keypair.public_key_bytes())?;
    }

    socket
        .connect(endpoint)
        .map_err(|e| transport("connect capture socket", e))?;
    socket
        .set_subscribe(b"")
        .map_err(|e| transport("subscribe capture socket", e))?;

    info!("Capture/logging task listening on {}", endpoint);
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zmqhub_core::{CspDecoder, CspVersion};

    use crate::diagnostics::diagnostic_channel;

    fn v2_packet(src: u64, dst: u64, payload_len: usize) -> Vec<u8> {
        let id: u64 = (2 << 46) | (dst << 32) | (src << 18) | (10 << 12) | (20 << 6);
        let mut raw = id.to_be_bytes()[2..].to_vec();
        raw.extend(std::iter::repeat(0xab).take(payload_len));
        raw
    }

    fn tap_with_log(log: Option<CaptureLog>) -> (CaptureTap, tokio::sync::mpsc::Receiver<crate::DiagnosticLine>) {
        let (tx, rx) = diagnostic_channel(32);
        let decoder = Arc::new(CspDecoder::new(CspVersion::V2));
        (CaptureTap::new(decoder, log, tx), rx)
    }

    #[test]
    fn test_process_well_formed() {
        let (mut tap, mut rx) = tap_with_log(None);

        let outcome = tap.process(&v2_packet(1, 2, 4));
        match outcome {
            CaptureOutcome::Decoded(header) => {
                assert_eq!(header.source, 1);
                assert_eq!(header.destination, 2);
                assert_eq!(header.payload_length, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            rx.try_recv().unwrap().text,
            "Packet: Src 1, Dst 2, Dport 10, Sport 20, Pri 2, Flags 0x00, Size 4"
        );
    }

    #[test]
    fn test_process_too_short() {
        let (mut tap, mut rx) = tap_with_log(None);

        assert_eq!(tap.process(&[]), CaptureOutcome::TooShort(0));
        assert_eq!(tap.process(&[1, 2, 3]), CaptureOutcome::TooShort(3));
        assert_eq!(rx.try_recv().unwrap().text, "ZMQ: Too short datalen: 0");
        assert_eq!(rx.try_recv().unwrap().text, "ZMQ: Too short datalen: 3");
        assert_eq!(
            tap.stats(),
            CaptureStats {
                decoded: 0,
                dropped: 2,
                logged: 0
            }
        );
    }

    #[test]
    fn test_log_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let log = CaptureLog::open(&path).unwrap();
        let (mut tap, _rx) = tap_with_log(Some(log));

        let first = v2_packet(3, 4, 4);
        let second = v2_packet(5, 6, 194);
        tap.process(&first);
        tap.process(&[0u8; 2]);
        tap.process(&second);

        // Readable before the tap is dropped
        let contents = std::fs::read(&path).unwrap();
        let mut expected = DELIMITER.to_vec();
        expected.extend_from_slice(&first);
        expected.extend_from_slice(DELIMITER);
        expected.extend_from_slice(&second);
        assert_eq!(contents, expected);
        assert_eq!(tap.stats().logged, 2);
    }

    #[test]
    fn test_log_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");

        let mut log = CaptureLog::open(&path).unwrap();
        log.append(b"one").unwrap();
        drop(log);

        let mut log = CaptureLog::open(&path).unwrap();
        log.append(b"two").unwrap();
        assert_eq!(log.records(), 1);

        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"--------\none--------\ntwo".to_vec()
        );
    }

    #[test]
    fn test_log_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("capture.log");
        match CaptureLog::open(&path) {
            Err(HubError::CaptureLogUnavailable { path: p, .. }) => assert_eq!(p, path),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_drain_discards_trailing_parts() {
        let ctx = zmq::Context::new();
        let rx = ctx.socket(zmq::PAIR).unwrap();
        rx.bind("inproc://drain").unwrap();
        let tx = ctx.socket(zmq::PAIR).unwrap();
        tx.connect("inproc://drain").unwrap();

        tx.send_multipart([&b"ab"[..], &b"cd"[..], &b"ef"[..]], 0).unwrap();
        tx.send("next", 0).unwrap();

        assert_eq!(rx.recv_bytes(0).unwrap(), b"ab");
        drain_parts(&rx);
        assert_eq!(rx.recv_bytes(0).unwrap(), b"next");
    }
}
