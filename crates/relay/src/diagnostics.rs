//! Diagnostic output
//!
//! Taps run on blocking threads and push rendered lines into a bounded
//! channel. A single async sink drains it to stdout, so lines from different
//! taps never interleave mid-line. A full channel drops lines instead of
//! stalling the taps.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use zmqhub_core::EndpointRole;

/// Lines buffered before taps start dropping
pub const DIAGNOSTIC_QUEUE_DEPTH: usize = 1024;

/// Which tap produced a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticOrigin {
    Monitor(EndpointRole),
    Capture,
}

impl fmt::Display for DiagnosticOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monitor(role) => write!(f, "monitor-{}", role),
            Self::Capture => f.write_str("capture"),
        }
    }
}

/// One rendered diagnostic line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    pub origin: DiagnosticOrigin,
    pub text: String,
}

/// Cloneable handle used by taps to emit lines
#[derive(Debug, Clone)]
pub struct DiagnosticSender {
    tx: mpsc::Sender<DiagnosticLine>,
    dropped: Arc<AtomicU64>,
    overflowing: Arc<AtomicBool>,
}

impl DiagnosticSender {
    /// Emit a line without blocking.
    ///
    /// Lines are dropped and counted while the sink is behind, so a stalled
    /// stdout never keeps a tap from seeing its stop request. Returns `false`
    /// once the sink has gone away.
    pub fn emit(&self, origin: DiagnosticOrigin, text: impl Into<String>) -> bool {
        let line = DiagnosticLine {
            origin,
            text: text.into(),
        };
        match self.tx.try_send(line) {
            Ok(()) => {
                if self.overflowing.swap(false, Ordering::Relaxed) {
                    debug!(
                        "Diagnostic sink caught up, {} lines dropped so far",
                        self.dropped()
                    );
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    warn!("Diagnostic sink is behind, dropping lines");
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Lines dropped because the sink was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create the diagnostic channel
pub fn diagnostic_channel(depth: usize) -> (DiagnosticSender, mpsc::Receiver<DiagnosticLine>) {
    let (tx, rx) = mpsc::channel(depth);
    let sender = DiagnosticSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        overflowing: Arc::new(AtomicBool::new(false)),
    };
    (sender, rx)
}

/// Write every received line to `out`, flushing after each one.
///
/// Returns the number of lines written once all senders are dropped.
pub async fn run_sink<W>(mut rx: mpsc::Receiver<DiagnosticLine>, mut out: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(line) = rx.recv().await {
        trace!(origin = %line.origin, "{}", line.text);
        out.write_all(line.text.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_writes_lines_in_order() {
        let (tx, rx) = diagnostic_channel(8);

        let producer = tokio::task::spawn_blocking(move || {
            assert!(tx.emit(DiagnosticOrigin::Capture, "first"));
            assert!(tx.emit(
                DiagnosticOrigin::Monitor(EndpointRole::Publisher),
                "second"
            ));
        });

        let mut out = Vec::new();
        let written = run_sink(rx, &mut out).await.unwrap();
        producer.await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_full_sink_drops_instead_of_blocking() {
        let (tx, mut rx) = diagnostic_channel(1);

        assert!(tx.emit(DiagnosticOrigin::Capture, "kept"));
        assert!(tx.emit(DiagnosticOrigin::Capture, "dropped"));
        assert!(tx.clone().emit(DiagnosticOrigin::Capture, "dropped too"));
        assert_eq!(tx.dropped(), 2);

        assert_eq!(rx.try_recv().unwrap().text, "kept");
        assert!(tx.emit(DiagnosticOrigin::Capture, "after catching up"));
        assert_eq!(rx.try_recv().unwrap().text, "after catching up");
        assert_eq!(tx.dropped(), 2);
    }

    #[test]
    fn test_emit_after_sink_dropped() {
        let (tx, rx) = diagnostic_channel(1);
        drop(rx);
        assert!(!tx.emit(DiagnosticOrigin::Capture, "lost"));
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(
            DiagnosticOrigin::Monitor(EndpointRole::Subscriber).to_string(),
            "monitor-sub"
        );
        assert_eq!(DiagnosticOrigin::Capture.to_string(), "capture");
    }
}
