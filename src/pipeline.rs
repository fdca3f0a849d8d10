//! Per-direction FIFO pipelines.
//!
//! Each direction runs as one task that owns its queue of pending requests and,
//! once validation has released it, its half of the stream. Requests are
//! served strictly one at a time and completed in submission order.
//!
//! When a transfer fails every queued request is drained with that error and
//! the direction parks: the stream is assumed dead, so requests enqueued after
//! the failure stay queued until the connection is dropped. Dropping the
//! connection completes everything still pending with a teardown error.

use crate::error::LinkError;
use crate::stream::ShutdownSignal;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Outcome of a single completed or failed message transfer.
#[derive(Debug)]
pub struct Completion {
    /// The caller's buffer, handed back. Receives append the body to it.
    pub buffer: Vec<u8>,
    /// Bytes moved by the operation that completed or failed.
    pub bytes_transferred: usize,
    /// Whether the transfer succeeded.
    pub result: Result<(), LinkError>,
}

impl Completion {
    /// Stand-in for a completion that never arrived. The buffer is not
    /// recoverable here.
    pub(crate) fn abandoned() -> Self {
        Self {
            buffer: Vec::new(),
            bytes_transferred: 0,
            result: Err(LinkError::aborted()),
        }
    }

    /// Whether the transfer succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Split into the buffer and byte count, or the error.
    pub fn into_result(self) -> Result<(Vec<u8>, usize), LinkError> {
        self.result.map(|()| (self.buffer, self.bytes_transferred))
    }
}

/// Continuation invoked exactly once when a request leaves its queue.
pub(crate) type Continuation = Box<dyn FnOnce(Completion) + Send + 'static>;

/// A queued message request: the caller's buffer plus its continuation.
///
/// A request dropped without being completed still fires its continuation,
/// with the buffer and a teardown error.
pub(crate) struct Request {
    buffer: Vec<u8>,
    continuation: Option<Continuation>,
}

/// Receive requests carry a buffer the body is appended to.
pub(crate) type PendingReceive = Request;

/// Send requests carry a buffer that is only read.
pub(crate) type PendingSend = Request;

impl Request {
    pub(crate) fn new(buffer: Vec<u8>, continuation: Continuation) -> Self {
        Self {
            buffer,
            continuation: Some(continuation),
        }
    }

    pub(crate) fn complete(mut self, bytes_transferred: usize, result: Result<(), LinkError>) {
        self.fire(bytes_transferred, result);
    }

    fn fire(&mut self, bytes_transferred: usize, result: Result<(), LinkError>) {
        if let Some(continuation) = self.continuation.take() {
            continuation(Completion {
                buffer: std::mem::take(&mut self.buffer),
                bytes_transferred,
                result,
            });
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.fire(0, Err(LinkError::aborted()));
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("len", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// Result of one transfer on a stream half.
#[derive(Debug)]
pub(crate) enum Transferred {
    /// The message moved; carries the body length.
    Done(usize),
    /// The request was refused before any IO. The stream is still usable.
    Rejected(LinkError),
    /// The stream failed part way; carries the bytes the failing step moved.
    Failed { error: LinkError, bytes: usize },
}

/// One direction of framed IO on a stream half.
#[async_trait]
pub(crate) trait FrameIo: Send {
    /// Name used in log events.
    const DIRECTION: &'static str;

    /// Move one message between the stream and `buffer`.
    async fn transfer(&mut self, buffer: &mut Vec<u8>) -> Transferred;
}

/// Sender half used by the connection to enqueue requests.
pub(crate) type RequestQueue = mpsc::UnboundedSender<Request>;

/// The task side of one direction.
pub(crate) struct Pipeline<F> {
    conn: u64,
    queue: mpsc::UnboundedReceiver<Request>,
    gate: oneshot::Receiver<F>,
    shutdown: ShutdownSignal,
}

impl<F: FrameIo> Pipeline<F> {
    /// Create a pipeline plus the handles used to feed and release it.
    pub(crate) fn new(
        conn: u64,
        shutdown: ShutdownSignal,
    ) -> (Self, RequestQueue, oneshot::Sender<F>) {
        let (queue_tx, queue) = mpsc::unbounded_channel();
        let (gate_tx, gate) = oneshot::channel();
        let pipeline = Self {
            conn,
            queue,
            gate,
            shutdown,
        };
        (pipeline, queue_tx, gate_tx)
    }

    /// Serve requests until the connection is torn down.
    pub(crate) async fn run(mut self) {
        if let Some(mut io) = self.open().await {
            debug!(conn = self.conn, direction = F::DIRECTION, "pipeline open");
            self.serve(&mut io).await;
        }
        self.abort();
    }

    /// Wait for validation to hand over the stream half.
    async fn open(&mut self) -> Option<F> {
        tokio::select! {
            biased;
            _ = self.shutdown.fired() => None,
            io = &mut self.gate => io.ok(),
        }
    }

    async fn next_request(&mut self) -> Option<Request> {
        tokio::select! {
            biased;
            _ = self.shutdown.fired() => None,
            request = self.queue.recv() => request,
        }
    }

    async fn serve(&mut self, io: &mut F) {
        while let Some(mut request) = self.next_request().await {
            let start = request.buffer.len();
            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.fired() => Transferred::Failed {
                    error: LinkError::aborted(),
                    bytes: 0,
                },
                outcome = io.transfer(&mut request.buffer) => outcome,
            };

            match outcome {
                Transferred::Done(bytes) => {
                    trace!(conn = self.conn, direction = F::DIRECTION, len = bytes, "message complete");
                    request.complete(bytes, Ok(()));
                }
                Transferred::Rejected(error) => {
                    debug!(conn = self.conn, direction = F::DIRECTION, %error, "message rejected");
                    request.complete(0, Err(error));
                }
                Transferred::Failed { error, bytes } => {
                    // A cancelled read may have appended part of a body.
                    request.buffer.truncate(start);
                    self.drain(request, &error, bytes);
                    // Stream is unusable from here on; hold later requests until teardown.
                    self.shutdown.fired().await;
                    return;
                }
            }
        }
    }

    /// Complete the failed request and everything queued behind it, in order.
    fn drain(&mut self, failed: Request, error: &LinkError, bytes: usize) {
        failed.complete(bytes, Err(error.clone()));
        let mut drained = 1;
        while let Ok(request) = self.queue.try_recv() {
            request.complete(bytes, Err(error.clone()));
            drained += 1;
        }
        debug!(
            conn = self.conn,
            direction = F::DIRECTION,
            drained,
            %error,
            "pipeline drained after stream error"
        );
    }

    /// Complete whatever is still queued with the teardown error.
    fn abort(&mut self) {
        self.queue.close();
        let mut aborted = 0;
        while let Ok(request) = self.queue.try_recv() {
            request.complete(0, Err(LinkError::aborted()));
            aborted += 1;
        }
        if aborted > 0 {
            debug!(conn = self.conn, direction = F::DIRECTION, aborted, "pipeline aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamHolder;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted stream half: each transfer pops the next outcome.
    struct Scripted {
        outcomes: VecDeque<Transferred>,
    }

    #[async_trait]
    impl FrameIo for Scripted {
        const DIRECTION: &'static str = "scripted";

        async fn transfer(&mut self, buffer: &mut Vec<u8>) -> Transferred {
            match self.outcomes.pop_front() {
                Some(outcome) => {
                    if let Transferred::Done(n) = outcome {
                        buffer.extend(std::iter::repeat(b'x').take(n));
                    }
                    outcome
                }
                None => std::future::pending().await,
            }
        }
    }

    type Log = Arc<Mutex<Vec<(usize, usize, Result<(), String>)>>>;

    fn recorder(log: &Log, index: usize) -> Continuation {
        let log = Arc::clone(log);
        Box::new(move |completion: Completion| {
            let result = completion.result.map_err(|e| e.to_string());
            log.lock()
                .unwrap()
                .push((index, completion.bytes_transferred, result));
        })
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_requests_wait_for_gate() {
        let (holder, shutdown) = StreamHolder::new();
        let (pipeline, queue, gate) = Pipeline::<Scripted>::new(1, shutdown);
        let task = tokio::spawn(pipeline.run());
        let log: Log = Arc::default();

        queue.send(Request::new(Vec::new(), recorder(&log, 0))).unwrap();
        settle().await;
        assert!(log.lock().unwrap().is_empty());

        let io = Scripted {
            outcomes: VecDeque::from([Transferred::Done(3)]),
        };
        assert!(gate.send(io).is_ok());
        settle().await;
        assert_eq!(*log.lock().unwrap(), vec![(0, 3, Ok(()))]);

        holder.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_drains_queue_in_order_then_parks() {
        let (holder, shutdown) = StreamHolder::new();
        let (pipeline, queue, gate) = Pipeline::<Scripted>::new(1, shutdown);
        let log: Log = Arc::default();

        for i in 0..4 {
            queue.send(Request::new(Vec::new(), recorder(&log, i))).unwrap();
        }
        let io = Scripted {
            outcomes: VecDeque::from([
                Transferred::Done(2),
                Transferred::Failed {
                    error: std::io::Error::from(std::io::ErrorKind::BrokenPipe).into(),
                    bytes: 1,
                },
            ]),
        };
        assert!(gate.send(io).is_ok());
        let task = tokio::spawn(pipeline.run());
        settle().await;

        {
            let log = log.lock().unwrap();
            let indices: Vec<usize> = log.iter().map(|entry| entry.0).collect();
            assert_eq!(indices, vec![0, 1, 2, 3]);
            assert_eq!(log[0], (0, 2, Ok(())));
            assert!(log[1..].iter().all(|(_, bytes, r)| *bytes == 1 && r.is_err()));
        }

        // Parked: a later request is neither served nor failed.
        queue.send(Request::new(Vec::new(), recorder(&log, 4))).unwrap();
        settle().await;
        assert_eq!(log.lock().unwrap().len(), 4);

        holder.close();
        task.await.unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 5);
        assert_eq!(log[4].0, 4);
        assert_eq!(log[4].2, Err(LinkError::aborted().to_string()));
    }

    #[tokio::test]
    async fn test_rejection_keeps_pipeline_running() {
        let (holder, shutdown) = StreamHolder::new();
        let (pipeline, queue, gate) = Pipeline::<Scripted>::new(1, shutdown);
        let log: Log = Arc::default();

        for i in 0..2 {
            queue.send(Request::new(Vec::new(), recorder(&log, i))).unwrap();
        }
        let io = Scripted {
            outcomes: VecDeque::from([
                Transferred::Rejected(LinkError::FrameTooLarge { len: 9, max: 1 }),
                Transferred::Done(1),
            ]),
        };
        assert!(gate.send(io).is_ok());
        let task = tokio::spawn(pipeline.run());
        settle().await;

        {
            let log = log.lock().unwrap();
            assert_eq!(log.len(), 2);
            assert!(log[0].2.is_err());
            assert_eq!(log[1], (1, 1, Ok(())));
        }

        holder.close();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_before_gate_aborts_everything() {
        let (holder, shutdown) = StreamHolder::new();
        let (pipeline, queue, _gate) = Pipeline::<Scripted>::new(1, shutdown);
        let task = tokio::spawn(pipeline.run());
        let log: Log = Arc::default();

        for i in 0..3 {
            queue.send(Request::new(Vec::new(), recorder(&log, i))).unwrap();
        }
        drop(holder);
        task.await.unwrap();

        let log = log.lock().unwrap();
        let indices: Vec<usize> = log.iter().map(|entry| entry.0).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(log.iter().all(|(_, bytes, r)| *bytes == 0 && r.is_err()));
    }

    #[test]
    fn test_dropped_request_returns_buffer() {
        let log: Arc<Mutex<Vec<Completion>>> = Arc::default();
        let sink = Arc::clone(&log);
        let request = Request::new(
            b"mine".to_vec(),
            Box::new(move |completion: Completion| sink.lock().unwrap().push(completion)),
        );
        drop(request);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].buffer, b"mine");
        assert_eq!(log[0].bytes_transferred, 0);
        assert!(log[0].result.as_ref().unwrap_err().is_aborted());
    }

    #[test]
    fn test_completed_request_fires_once() {
        let count = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&count);
        let request = Request::new(Vec::new(), Box::new(move |_: Completion| *seen.lock().unwrap() += 1));
        request.complete(0, Ok(()));

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_completion_into_result() {
        let done = Completion {
            buffer: b"ok".to_vec(),
            bytes_transferred: 2,
            result: Ok(()),
        };
        assert!(done.is_ok());
        assert_eq!(done.into_result().unwrap(), (b"ok".to_vec(), 2));

        let abandoned = Completion::abandoned();
        assert!(abandoned.into_result().unwrap_err().is_aborted());
    }
}
