//! The per-connection state machine.

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::framing::{FrameReader, FrameWriter};
use crate::handshake::Validator;
use crate::pipeline::{Completion, PendingReceive, PendingSend, Pipeline, Request, RequestQueue};
use crate::stream::{LinkStream, StreamHolder};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Framed, validated message transport over a duplex byte stream.
///
/// A connection owns its stream exclusively. Messages are framed with a
/// 4-byte big-endian length prefix. Before any message moves, both peers must
/// run [`validate`](Self::validate) and exchange the same identifier string.
///
/// Receives and sends are queued per direction and served one at a time, so
/// the stream never sees two concurrent reads or two concurrent writes.
/// Requests may be queued at any time, including before validation and from
/// inside a continuation; they complete strictly in submission order.
///
/// After a stream error the affected direction stops: everything queued at
/// that point fails with the error, and requests queued afterwards wait until
/// the connection is dropped. Build a new connection to recover.
///
/// Dropping the connection tears the stream down. Every in-flight and queued
/// request, in both directions, then completes with a `ConnectionAborted`
/// stream error.
///
/// # Example
///
/// ```no_run
/// use framelink::Connection;
/// use tokio::net::TcpStream;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = TcpStream::connect("127.0.0.1:5666").await?;
/// let conn = Connection::new(stream, "svc42");
///
/// // Queued now, sent once validation succeeds.
/// let sent = conn.send_message(b"ping".to_vec());
/// conn.validate().await?;
/// sent.await.into_result()?;
///
/// let (reply, len) = conn.receive_message(Vec::new()).await.into_result()?;
/// assert_eq!(len, reply.len());
/// # Ok(())
/// # }
/// ```
pub struct Connection<S: LinkStream> {
    // Fired first on drop, before any other state is released.
    holder: StreamHolder,
    id: u64,
    config: LinkConfig,
    validator: Validator<S>,
    receive_queue: RequestQueue,
    send_queue: RequestQueue,
}

impl<S: LinkStream> Connection<S> {
    /// Create a connection over `stream` using `identifier` for validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(stream: S, identifier: impl Into<String>) -> Self {
        Self::with_config(stream, LinkConfig::new(identifier))
    }

    /// Create a connection with explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_config(stream: S, config: LinkConfig) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (holder, shutdown) = StreamHolder::new();

        let (receiver, receive_queue, receive_gate) =
            Pipeline::<FrameReader<ReadHalf<S>>>::new(id, shutdown.clone());
        let (sender, send_queue, send_gate) =
            Pipeline::<FrameWriter<WriteHalf<S>>>::new(id, shutdown.clone());
        tokio::spawn(receiver.run());
        tokio::spawn(sender.run());

        let validator = Validator::new(
            id,
            stream,
            &config.identifier,
            config.max_frame_len,
            (receive_gate, send_gate),
            shutdown,
        );
        debug!(conn = id, "connection created");

        Self {
            holder,
            id,
            config,
            validator,
            receive_queue,
            send_queue,
        }
    }

    /// Process-unique id, used in log events.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identifier exchanged during validation.
    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    /// Configuration this connection was built with.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Whether the validation handshake has succeeded.
    pub fn is_validated(&self) -> bool {
        self.validator.is_validated()
    }

    /// Run the validation handshake, reporting the outcome to `handler`.
    ///
    /// If the connection is already validated `handler` is called before this
    /// returns, with [`LinkError::AlreadyValidated`], and the stream is not
    /// touched. The same holds for [`LinkError::HandshakeInProgress`].
    ///
    /// Otherwise the identifier is written, the peer's identifier is read back
    /// and compared. A mismatch reports [`LinkError::ProtocolViolation`]; IO
    /// failures report [`LinkError::Stream`]. Either way the connection stays
    /// unvalidated and queued messages stay queued.
    pub fn validate_with<H>(&self, handler: H)
    where
        H: FnOnce(LinkResult<()>) + Send + 'static,
    {
        self.validator.start(Box::new(handler));
    }

    /// Run the validation handshake, returning a future for its outcome.
    ///
    /// The attempt starts immediately; the future only observes it.
    pub fn validate(&self) -> PendingValidation {
        let (tx, rx) = oneshot::channel();
        self.validate_with(move |result| {
            let _ = tx.send(result);
        });
        PendingValidation { rx }
    }

    /// Queue a receive. The next message body is appended to `buffer`.
    ///
    /// `handler` receives the buffer back along with the body length.
    pub fn async_receive_message<H>(&self, buffer: Vec<u8>, handler: H)
    where
        H: FnOnce(Completion) + Send + 'static,
    {
        let request = PendingReceive::new(buffer, Box::new(handler));
        enqueue(&self.receive_queue, request);
    }

    /// Queue a receive, returning a future for its completion.
    ///
    /// The request takes its place in the queue when this is called.
    pub fn receive_message(&self, buffer: Vec<u8>) -> PendingTransfer {
        let (tx, rx) = oneshot::channel();
        self.async_receive_message(buffer, move |completion| {
            let _ = tx.send(completion);
        });
        PendingTransfer { rx }
    }

    /// Queue `buffer` to be sent as one message.
    ///
    /// `handler` receives the buffer back, unmodified, along with the number
    /// of body bytes written.
    pub fn async_send_message<H>(&self, buffer: Vec<u8>, handler: H)
    where
        H: FnOnce(Completion) + Send + 'static,
    {
        let request = PendingSend::new(buffer, Box::new(handler));
        enqueue(&self.send_queue, request);
    }

    /// Queue `buffer` to be sent, returning a future for its completion.
    ///
    /// The request takes its place in the queue when this is called.
    pub fn send_message(&self, buffer: Vec<u8>) -> PendingTransfer {
        let (tx, rx) = oneshot::channel();
        self.async_send_message(buffer, move |completion| {
            let _ = tx.send(completion);
        });
        PendingTransfer { rx }
    }
}

fn enqueue(queue: &RequestQueue, request: Request) {
    // The pipeline task only goes away with the runtime.
    if let Err(mpsc::error::SendError(request)) = queue.send(request) {
        request.complete(0, Err(LinkError::aborted()));
    }
}

impl<S: LinkStream> Drop for Connection<S> {
    fn drop(&mut self) {
        self.holder.close();
        debug!(conn = self.id, "connection dropped");
    }
}

impl<S: LinkStream> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identifier", &self.config.identifier)
            .field("validated", &self.is_validated())
            .finish_non_exhaustive()
    }
}

/// Future for the outcome of [`Connection::validate`].
#[derive(Debug)]
#[must_use = "the handshake runs regardless; the future only reports its outcome"]
pub struct PendingValidation {
    rx: oneshot::Receiver<LinkResult<()>>,
}

impl Future for PendingValidation {
    type Output = LinkResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(LinkError::aborted())))
    }
}

/// Future for the completion of a queued receive or send.
///
/// The caller's buffer comes back inside the [`Completion`], including when
/// the request is aborted by teardown or dropped along with its pipeline.
/// Should no completion arrive at all, the future resolves to an aborted
/// completion with an empty buffer.
#[derive(Debug)]
#[must_use = "the request is queued regardless; the future only reports its completion"]
pub struct PendingTransfer {
    rx: oneshot::Receiver<Completion>,
}

impl Future for PendingTransfer {
    type Output = Completion;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|completion| completion.unwrap_or_else(|_| Completion::abandoned()))
    }
}
