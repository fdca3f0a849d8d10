//! Request/response style access to a connection.

use crate::connection::Connection;
use crate::error::LinkResult;
use crate::stream::LinkStream;
use async_trait::async_trait;
use tracing::instrument;

/// A validated channel that moves whole messages.
///
/// Callers that prefer awaiting each message over registering continuations
/// can program against this trait; ordering and error semantics are those of
/// the underlying queues.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send one message, returning the number of body bytes written.
    async fn send(&self, message: Vec<u8>) -> LinkResult<usize>;

    /// Receive the next message body.
    async fn recv(&self) -> LinkResult<Vec<u8>>;

    /// Whether the validation handshake has succeeded.
    fn is_validated(&self) -> bool;
}

#[async_trait]
impl<S: LinkStream> MessageTransport for Connection<S> {
    #[instrument(skip(self, message), fields(conn = self.id(), msg_len = message.len()))]
    async fn send(&self, message: Vec<u8>) -> LinkResult<usize> {
        let (_, written) = self.send_message(message).await.into_result()?;
        Ok(written)
    }

    #[instrument(skip(self), fields(conn = self.id()))]
    async fn recv(&self) -> LinkResult<Vec<u8>> {
        let (body, _) = self.receive_message(Vec::new()).await.into_result()?;
        Ok(body)
    }

    fn is_validated(&self) -> bool {
        Connection::is_validated(self)
    }
}
