use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::ResponseStream;
use crate::bidi::context::CallContext;
use crate::error::CallError;

/// The receive half of a [`BidiCall`](crate::BidiCall).
///
/// Keeps draining responses after the send half has closed. Dropping it before
/// the end-of-stream marker cancels the call.
pub struct BidiReceiver<Resp> {
    ctx: Arc<CallContext>,
    inbound: Option<ResponseStream<Resp>>,
    received: u64,
}

impl<Resp> BidiReceiver<Resp>
where
    Resp: Send + 'static,
{
    pub(crate) fn new(ctx: Arc<CallContext>, inbound: ResponseStream<Resp>) -> Self {
        Self {
            ctx,
            inbound: Some(inbound),
            received: 0,
        }
    }

    /// Number of responses received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Receive the next response.
    ///
    /// `Ok(None)` is the end-of-stream marker; after it, or after an error,
    /// every further call returns `Ok(None)`. An error fails the whole call and
    /// releases the send half.
    pub async fn message(&mut self) -> Result<Option<Resp>, CallError> {
        let Some(inbound) = self.inbound.as_mut() else {
            return Ok(None);
        };
        self.ctx.activate();

        match self.ctx.guard(inbound.next()).await {
            Ok(Some(Ok(msg))) => {
                self.received += 1;
                Ok(Some(msg))
            }
            Ok(Some(Err(status))) => {
                self.inbound = None;
                Err(self.ctx.fail(CallError::from(status)))
            }
            Ok(None) => {
                self.inbound = None;
                debug!(
                    call_id = %self.ctx.call_id,
                    received = self.received,
                    "Bidi receive half reached end of stream"
                );
                self.ctx.finish_receive();
                Ok(None)
            }
            Err(e) => {
                self.inbound = None;
                Err(e)
            }
        }
    }

    /// The receive loop: collect every response up to the end-of-stream marker.
    pub async fn receive_all(mut self) -> Result<Vec<Resp>, CallError> {
        let mut responses = Vec::new();
        while let Some(msg) = self.message().await? {
            responses.push(msg);
        }
        Ok(responses)
    }

    /// Consume the receive half as a `Stream` that ends after the end marker or
    /// after the first error.
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
}

impl<Resp> Drop for BidiReceiver<Resp> {
    fn drop(&mut self) {
        if self.inbound.take().is_some() {
            self.ctx.fail(CallError::Cancelled);
        }
    }
}
