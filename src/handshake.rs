//! Connection validation handshake.
//!
//! A two-step exchange that runs at most once per successful validation:
//! write our identifier verbatim, then read exactly as many bytes back and
//! compare. Success splits the stream and releases both pipelines; failure
//! parks the stream again so a later `validate` call can retry.

use crate::error::{LinkError, LinkResult};
use crate::framing::{FrameReader, FrameWriter};
use crate::stream::{LinkStream, ShutdownSignal};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Continuation for a validation attempt.
pub(crate) type ValidateHandler = Box<dyn FnOnce(LinkResult<()>) + Send + 'static>;

/// Release handle for the receive pipeline.
pub(crate) type ReceiveGate<S> = oneshot::Sender<FrameReader<ReadHalf<S>>>;

/// Release handle for the send pipeline.
pub(crate) type SendGate<S> = oneshot::Sender<FrameWriter<WriteHalf<S>>>;

/// Where a connection is in the validation handshake.
#[derive(Debug)]
pub(crate) enum ValidationState<S> {
    /// Not validated; the stream is parked here until an attempt claims it.
    NotStarted(S),
    /// An attempt owns the stream.
    InProgress,
    /// Validated; the stream now belongs to the pipelines.
    Validated,
}

struct Slot<S: LinkStream> {
    state: ValidationState<S>,
    receive_gate: Option<ReceiveGate<S>>,
    send_gate: Option<SendGate<S>>,
}

/// Drives the handshake and hands the stream to the pipelines on success.
pub(crate) struct Validator<S: LinkStream> {
    conn: u64,
    identifier: Arc<[u8]>,
    max_frame_len: u32,
    slot: Arc<Mutex<Slot<S>>>,
    shutdown: ShutdownSignal,
}

impl<S: LinkStream> Validator<S> {
    pub(crate) fn new(
        conn: u64,
        stream: S,
        identifier: &str,
        max_frame_len: u32,
        gates: (ReceiveGate<S>, SendGate<S>),
        shutdown: ShutdownSignal,
    ) -> Self {
        let slot = Slot {
            state: ValidationState::NotStarted(stream),
            receive_gate: Some(gates.0),
            send_gate: Some(gates.1),
        };
        Self {
            conn,
            identifier: Arc::from(identifier.as_bytes()),
            max_frame_len,
            slot: Arc::new(Mutex::new(slot)),
            shutdown,
        }
    }

    pub(crate) fn is_validated(&self) -> bool {
        matches!(self.slot.lock().state, ValidationState::Validated)
    }

    /// Start a validation attempt.
    ///
    /// Reports `AlreadyValidated` or `HandshakeInProgress` synchronously,
    /// without touching the stream. Otherwise the exchange runs on its own task.
    pub(crate) fn start(&self, handler: ValidateHandler) {
        let claimed = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut slot.state, ValidationState::InProgress) {
                ValidationState::NotStarted(stream) => Ok(stream),
                ValidationState::InProgress => Err(LinkError::HandshakeInProgress),
                ValidationState::Validated => {
                    slot.state = ValidationState::Validated;
                    Err(LinkError::AlreadyValidated)
                }
            }
        };

        let stream = match claimed {
            Ok(stream) => stream,
            Err(error) => {
                debug!(conn = self.conn, %error, "validate refused");
                handler(Err(error));
                return;
            }
        };

        let attempt = Attempt {
            conn: self.conn,
            identifier: Arc::clone(&self.identifier),
            max_frame_len: self.max_frame_len,
            slot: Arc::clone(&self.slot),
            shutdown: self.shutdown.clone(),
        };
        tokio::spawn(attempt.run(stream, handler));
    }
}

/// One validation attempt running on its own task.
struct Attempt<S: LinkStream> {
    conn: u64,
    identifier: Arc<[u8]>,
    max_frame_len: u32,
    slot: Arc<Mutex<Slot<S>>>,
    shutdown: ShutdownSignal,
}

impl<S: LinkStream> Attempt<S> {
    async fn run(mut self, mut stream: S, handler: ValidateHandler) {
        debug!(conn = self.conn, len = self.identifier.len(), "validation started");
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.fired() => Err(LinkError::aborted()),
            outcome = exchange(&mut stream, &self.identifier) => outcome,
        };

        match outcome {
            Ok(()) => {
                let (reader, writer) = tokio::io::split(stream);
                let (receive_gate, send_gate) = {
                    let mut slot = self.slot.lock();
                    slot.state = ValidationState::Validated;
                    (slot.receive_gate.take(), slot.send_gate.take())
                };
                info!(conn = self.conn, "connection validated");

                handler(Ok(()));

                // A closed gate means the pipeline already saw teardown.
                if let Some(gate) = receive_gate {
                    let _ = gate.send(FrameReader::new(reader, self.max_frame_len));
                }
                if let Some(gate) = send_gate {
                    let _ = gate.send(FrameWriter::new(writer, self.max_frame_len));
                }
            }
            Err(error) => {
                self.slot.lock().state = ValidationState::NotStarted(stream);
                warn!(conn = self.conn, %error, "validation failed");
                handler(Err(error));
            }
        }
    }
}

/// Send `identifier` verbatim, then expect the peer to send the same bytes.
pub(crate) async fn exchange<S>(stream: &mut S, identifier: &[u8]) -> LinkResult<()>
where
    S: LinkStream,
{
    stream.write_all(identifier).await?;
    stream.flush().await?;

    let mut received = vec![0u8; identifier.len()];
    stream.read_exact(&mut received).await?;

    if received != identifier {
        return Err(LinkError::ProtocolViolation {
            expected_len: identifier.len(),
        });
    }
    Ok(())
}
