//! Shared test infrastructure for connection tests.

#![allow(dead_code)]

use framelink::{Completion, Connection, LinkConfig};
use std::time::Duration;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;

/// Upper bound on how long any single completion may take.
pub const WAIT: Duration = Duration::from_secs(5);

/// Capacity of the in-memory pipe between two peers.
pub const PIPE_CAPACITY: usize = 64 * 1024;

pub type DuplexConnection = Connection<DuplexStream>;

// ============================================================================
// Connection Setup
// ============================================================================

/// Two unvalidated connections joined by an in-memory pipe.
pub fn pair(left_id: &str, right_id: &str) -> (DuplexConnection, DuplexConnection) {
    let (a, b) = duplex(PIPE_CAPACITY);
    (Connection::new(a, left_id), Connection::new(b, right_id))
}

/// Two unvalidated connections sharing one configuration.
pub fn pair_with_config(config: LinkConfig) -> (DuplexConnection, DuplexConnection) {
    let (a, b) = duplex(PIPE_CAPACITY);
    (
        Connection::with_config(a, config.clone()),
        Connection::with_config(b, config),
    )
}

/// Two connections that have completed the handshake.
pub async fn validated_pair(identifier: &str) -> (DuplexConnection, DuplexConnection) {
    let (left, right) = pair(identifier, identifier);
    validate_both(&left, &right).await;
    (left, right)
}

pub async fn validate_both(left: &DuplexConnection, right: &DuplexConnection) {
    let (l, r) = tokio::join!(left.validate(), right.validate());
    l.expect("left validation");
    r.expect("right validation");
}

// ============================================================================
// Completion Recording
// ============================================================================

/// Collects continuation invocations tagged with the caller's index.
pub struct Recorder {
    tx: mpsc::UnboundedSender<(usize, Completion)>,
    rx: mpsc::UnboundedReceiver<(usize, Completion)>,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Continuation that records its completion under `index`.
    pub fn handler(&self, index: usize) -> impl FnOnce(Completion) + Send + 'static {
        let tx = self.tx.clone();
        move |completion| {
            let _ = tx.send((index, completion));
        }
    }

    /// Wait for the next `count` completions, in the order they fired.
    pub async fn collect(&mut self, count: usize) -> Vec<(usize, Completion)> {
        let mut seen = Vec::with_capacity(count);
        for _ in 0..count {
            let next = tokio::time::timeout(WAIT, self.rx.recv())
                .await
                .expect("completion timed out")
                .expect("recorder closed");
            seen.push(next);
        }
        seen
    }

    /// Assert nothing else fires within `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some((index, completion))) = tokio::time::timeout(window, self.rx.recv()).await {
            panic!("unexpected completion {index}: {completion:?}");
        }
    }
}

/// Indices of recorded completions, in firing order.
pub fn indices(seen: &[(usize, Completion)]) -> Vec<usize> {
    seen.iter().map(|(index, _)| *index).collect()
}
