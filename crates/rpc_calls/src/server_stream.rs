use std::future::Future;

use futures::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::deadline::Deadline;
use crate::error::CallError;
use crate::state::CallState;
use crate::{BoxFuture, ResponseStream};

/// A server-streaming call: one request already handed to the transport, then
/// a lazy, finite, non-restartable sequence of responses.
///
/// The deadline covers the whole stream, not each message.
pub struct ServerStreamCall<Resp> {
    call_id: Uuid,
    deadline: Deadline,
    opening: Option<BoxFuture<Result<ResponseStream<Resp>, Status>>>,
    inbound: Option<ResponseStream<Resp>>,
    state: CallState,
    received: u64,
}

impl<Resp> ServerStreamCall<Resp>
where
    Resp: Send + 'static,
{
    /// Wrap a pending server-streaming call. Nothing is polled until the first
    /// [`message`](Self::message).
    pub fn open<F, S>(deadline: Deadline, call: F) -> Self
    where
        F: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        let opening: BoxFuture<Result<ResponseStream<Resp>, Status>> = Box::pin(async move {
            let stream = call.await?;
            Ok(Box::pin(stream) as ResponseStream<Resp>)
        });

        Self {
            call_id: Uuid::new_v4(),
            deadline,
            opening: Some(opening),
            inbound: None,
            state: CallState::Open,
            received: 0,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Number of responses yielded so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Receive the next response.
    ///
    /// `Ok(None)` is the end-of-stream marker. Once the stream has ended or
    /// failed every further call returns `Ok(None)`.
    pub async fn message(&mut self) -> Result<Option<Resp>, CallError> {
        if self.state.is_terminal() {
            return Ok(None);
        }
        self.state = CallState::Active;

        let deadline = self.deadline;
        match deadline.run(self.next_inbound()).await {
            Ok(Some(msg)) => {
                self.received += 1;
                Ok(Some(msg))
            }
            Ok(None) => {
                self.finish(CallState::Closed);
                debug!(
                    call_id = %self.call_id,
                    received = self.received,
                    "Server stream ended"
                );
                Ok(None)
            }
            Err(e) => {
                self.finish(CallState::Failed);
                warn!(
                    call_id = %self.call_id,
                    received = self.received,
                    error = %e,
                    "Server stream failed"
                );
                Err(e)
            }
        }
    }

    /// Consume the call as a `Stream` that ends after the end marker or after
    /// the first error.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Resp, CallError>> + Send {
        async_stream::stream! {
            loop {
                match self.message().await {
                    Ok(Some(msg)) => yield Ok(msg),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }

    async fn next_inbound(&mut self) -> Result<Option<Resp>, CallError> {
        if let Some(opening) = self.opening.take() {
            self.inbound = Some(opening.await?);
        }

        let Some(inbound) = self.inbound.as_mut() else {
            return Ok(None);
        };

        inbound.next().await.transpose().map_err(CallError::from)
    }

    fn finish(&mut self, state: CallState) {
        self.state = state;
        self.opening = None;
        self.inbound = None;
    }
}
