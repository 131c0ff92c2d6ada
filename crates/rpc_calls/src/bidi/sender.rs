use std::pin::pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::bidi::context::CallContext;
use crate::error::CallError;
use crate::state::CallState;

/// The send half of a [`BidiCall`](crate::BidiCall).
///
/// Progresses independently of the receive half. Dropping it half-closes.
pub struct BidiSender<Req> {
    ctx: Arc<CallContext>,
    tx: Option<mpsc::Sender<Req>>,
    sent: u64,
}

impl<Req> BidiSender<Req>
where
    Req: Send + 'static,
{
    pub(crate) fn new(ctx: Arc<CallContext>, tx: mpsc::Sender<Req>) -> Self {
        Self {
            ctx,
            tx: Some(tx),
            sent: 0,
        }
    }

    /// Number of requests accepted so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send one request, suspending while the outbound buffer is full.
    ///
    /// Fails with `InvalidState` after [`half_close`](Self::half_close) or
    /// once the endpoint has ended its stream, and with the call's failure
    /// once either direction failed or the deadline fired.
    pub async fn send(&mut self, request: Req) -> Result<(), CallError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(CallError::InvalidState("send after half-close"));
        };
        match self.ctx.state() {
            CallState::Failed => return Err(self.ctx.failure()),
            CallState::Draining | CallState::Closed => {
                return Err(CallError::InvalidState("endpoint already ended the stream"));
            }
            _ => {}
        }
        self.ctx.activate();

        let stop = self.ctx.stop_sending();
        let sent = self
            .ctx
            .guard(async {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => None,
                    sent = tx.send(request) => Some(sent.is_ok()),
                }
            })
            .await;

        match sent {
            Ok(Some(true)) => {
                self.sent += 1;
                Ok(())
            }
            Ok(Some(false)) => {
                // The transport let go of the request stream, so the call is
                // ending. Let the receive half report how.
                let settled = self.ctx.guard(self.ctx.stop_sending().cancelled()).await;
                self.half_close();
                settled.and(Err(CallError::InvalidState(
                    "endpoint already ended the stream",
                )))
            }
            Ok(None) => {
                self.half_close();
                Err(CallError::InvalidState("endpoint already ended the stream"))
            }
            Err(e) => {
                self.tx = None;
                Err(e)
            }
        }
    }

    /// Signal that no further requests will be sent. The receive half is not
    /// affected. Idempotent.
    pub fn half_close(&mut self) {
        if self.tx.take().is_some() {
            debug!(call_id = %self.ctx.call_id, sent = self.sent, "Bidi send half closed");
            self.ctx.finish_send();
        }
    }

    /// The send loop: forward every request from `requests` in order, then
    /// half-close.
    ///
    /// Stops early without error if the endpoint ends its stream first.
    /// Returns the number of requests sent.
    pub async fn send_all<S>(mut self, requests: S) -> Result<u64, CallError>
    where
        S: Stream<Item = Req>,
    {
        let mut requests = pin!(requests);

        loop {
            let stop = self.ctx.stop_sending();
            let next = self
                .ctx
                .guard(async {
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => None,
                        next = requests.next() => next,
                    }
                })
                .await?;

            let Some(request) = next else {
                break;
            };

            match self.send(request).await {
                Ok(()) => {}
                Err(CallError::InvalidState(_))
                    if matches!(self.ctx.state(), CallState::Draining | CallState::Closed) =>
                {
                    debug!(
                        call_id = %self.ctx.call_id,
                        sent = self.sent,
                        "Endpoint ended the stream, send loop stopped"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.half_close();
        Ok(self.sent)
    }
}

impl<Req> Drop for BidiSender<Req> {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.ctx.finish_send();
        }
    }
}
