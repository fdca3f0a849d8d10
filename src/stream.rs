//! Stream capability and teardown signalling.
//!
//! A connection never shares its stream. Tearing the connection down fires a
//! signal that every in-flight read, write and handshake races against, so
//! pending work observes a stream error instead of touching a released stream.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

/// Capability set a connection needs from its underlying byte stream.
///
/// Exact-length reads and full writes are built on `AsyncRead`/`AsyncWrite`;
/// forced closure is dropping the value. Implemented for every Tokio stream,
/// e.g. `TcpStream`, `UnixStream`, TLS streams and `DuplexStream`.
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Owner side of the teardown signal. Fires on [`close`](Self::close) or drop.
#[derive(Debug)]
pub(crate) struct StreamHolder {
    closed: watch::Sender<bool>,
}

impl StreamHolder {
    pub(crate) fn new() -> (Self, ShutdownSignal) {
        let (closed, rx) = watch::channel(false);
        (Self { closed }, ShutdownSignal { rx })
    }

    /// Fire the teardown signal. Idempotent.
    pub(crate) fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl Drop for StreamHolder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Observer side of the teardown signal.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once the holder has closed or been dropped. Cancel safe.
    pub(crate) async fn fired(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
