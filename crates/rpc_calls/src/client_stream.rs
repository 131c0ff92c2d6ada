use std::future::Future;

use tonic::Status;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::deadline::Deadline;
use crate::error::CallError;
use crate::state::CallState;
use crate::{BoxFuture, RequestStream, outbound};

enum SendStep<Resp> {
    Sent(bool),
    Settled(Result<Option<Resp>, Status>),
}

/// A client-streaming call: the caller sends zero or more requests, half-closes,
/// and receives exactly one aggregate response.
///
/// The call is driven from the caller's task only. While a `send` is suspended
/// on a full buffer the pending response is polled alongside it, so an endpoint
/// that fails early unblocks the sender.
pub struct ClientStreamCall<Req, Resp> {
    call_id: Uuid,
    deadline: Deadline,
    tx: Option<tokio::sync::mpsc::Sender<Req>>,
    response: Option<BoxFuture<Result<Option<Resp>, Status>>>,
    outcome: Option<Result<Resp, CallError>>,
    state: CallState,
    sent: u64,
}

impl<Req, Resp> ClientStreamCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Open the call. `call` receives the outbound request stream and resolves
    /// to the endpoint's single response, `None` if the endpoint sent none.
    pub fn open<C, F>(deadline: Deadline, capacity: usize, call: C) -> Self
    where
        C: FnOnce(RequestStream<Req>) -> F,
        F: Future<Output = Result<Option<Resp>, Status>> + Send + 'static,
    {
        let (tx, requests) = outbound(capacity);
        let call_id = Uuid::new_v4();
        debug!(call_id = %call_id, timeout = ?deadline.remaining(), "Client stream opened");

        Self {
            call_id,
            deadline,
            tx: Some(tx),
            response: Some(Box::pin(call(requests))),
            outcome: None,
            state: CallState::Open,
            sent: 0,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Number of requests accepted so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send one request, suspending while the outbound buffer is full.
    pub async fn send(&mut self, request: Req) -> Result<(), CallError> {
        if self.state == CallState::HalfClosed {
            return Err(CallError::InvalidState("send after half-close"));
        }
        if self.state.is_terminal() || self.outcome.is_some() {
            return Err(CallError::InvalidState("call already completed"));
        }
        let (Some(tx), Some(response)) = (self.tx.as_ref(), self.response.as_mut()) else {
            return Err(CallError::InvalidState("call already completed"));
        };
        self.state = CallState::Active;

        let deadline = self.deadline;
        let step = deadline
            .run(async {
                tokio::select! {
                    biased;
                    settled = response => Ok(SendStep::Settled(settled)),
                    sent = tx.send(request) => Ok(SendStep::Sent(sent.is_ok())),
                }
            })
            .await;

        match step {
            Ok(SendStep::Sent(true)) => {
                self.sent += 1;
                Ok(())
            }
            Ok(SendStep::Sent(false)) => {
                // The transport dropped the request stream, so the call has
                // settled; find out how.
                self.tx = None;
                let outcome = self.wait_response().await;
                self.settle_early(outcome)
            }
            Ok(SendStep::Settled(result)) => {
                self.tx = None;
                self.response = None;
                self.settle_early(into_outcome(result))
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Signal that no further requests will be sent.
    pub fn half_close(&mut self) {
        self.tx = None;
        if matches!(self.state, CallState::Open | CallState::Active) {
            self.state = CallState::HalfClosed;
            debug!(call_id = %self.call_id, sent = self.sent, "Client stream half-closed");
        }
    }

    /// Half-close and wait for the single aggregate response.
    pub async fn close_and_receive(mut self) -> Result<Resp, CallError> {
        self.half_close();

        let result = self.wait_response().await;
        match &result {
            Ok(_) => {
                self.state = CallState::Closed;
                debug!(call_id = %self.call_id, sent = self.sent, "Client stream completed");
            }
            Err(e) => self.fail(e),
        }
        result
    }

    async fn wait_response(&mut self) -> Result<Resp, CallError> {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let Some(response) = self.response.take() else {
            return Err(CallError::InvalidState("call already completed"));
        };

        let deadline = self.deadline;
        deadline
            .run(async move { into_outcome(response.await) })
            .await
    }

    /// Record an outcome that arrived before half-close.
    fn settle_early(&mut self, outcome: Result<Resp, CallError>) -> Result<(), CallError> {
        match outcome {
            Ok(response) => {
                self.outcome = Some(Ok(response));
                Err(CallError::InvalidState(
                    "endpoint completed the call before half-close",
                ))
            }
            Err(e) => {
                self.fail(&e);
                self.outcome = Some(Err(e.clone()));
                Err(e)
            }
        }
    }

    fn fail(&mut self, error: &CallError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = CallState::Failed;
        self.tx = None;
        self.response = None;
        if self.outcome.is_none() {
            self.outcome = Some(Err(error.clone()));
        }
        warn!(call_id = %self.call_id, sent = self.sent, error = %error, "Client stream failed");
    }
}

fn into_outcome<Resp>(result: Result<Option<Resp>, Status>) -> Result<Resp, CallError> {
    match result {
        Ok(Some(response)) => Ok(response),
        Ok(None) => Err(CallError::ProtocolViolation("no response after half-close")),
        Err(status) => Err(CallError::from(status)),
    }
}
