use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::deadline::Deadline;
use crate::error::CallError;
use crate::state::{CallState, StateCell};

/// State shared by the two halves of a bidirectional call and its completion
/// waiter.
pub(crate) struct CallContext {
    pub(crate) call_id: Uuid,
    pub(crate) deadline: Deadline,
    state: StateCell,
    // Cancelled when the call fails; releases both loops.
    cancel: CancellationToken,
    // Child of `cancel`; also cancelled once the endpoint ends its stream.
    stop_sending: CancellationToken,
    failure: Mutex<Option<CallError>>,
}

impl CallContext {
    pub(crate) fn new(deadline: Deadline) -> Self {
        let cancel = CancellationToken::new();
        Self {
            call_id: Uuid::new_v4(),
            deadline,
            state: StateCell::new(),
            stop_sending: cancel.child_token(),
            cancel,
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> CallState {
        self.state.get()
    }

    pub(crate) fn stop_sending(&self) -> &CancellationToken {
        &self.stop_sending
    }

    pub(crate) fn activate(&self) {
        if let Some(state) = self.state.activate() {
            self.log_transition(state);
        }
    }

    pub(crate) fn finish_send(&self) {
        if let Some(state) = self.state.finish_send() {
            self.log_transition(state);
        }
    }

    /// End of stream: stop the send half, which counts as finished from here
    /// on, and close the call.
    pub(crate) fn finish_receive(&self) {
        if let Some(state) = self.state.finish_receive() {
            self.log_transition(state);
            self.stop_sending.cancel();
            if let Some(state) = self.state.close() {
                self.log_transition(state);
            }
        }
    }

    /// Fail the call with `error` unless it already reached a terminal state,
    /// then release both loops. Returns the error the call failed with, which
    /// is the first one recorded.
    pub(crate) fn fail(&self, error: CallError) -> CallError {
        let failed = {
            let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            let failed = self.state.fail();
            if failed {
                warn!(call_id = %self.call_id, error = %error, "Bidi call failed");
                *slot = Some(error);
            }
            failed
        };
        if failed {
            self.cancel.cancel();
        }
        self.failure()
    }

    pub(crate) fn failure(&self) -> CallError {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(CallError::Cancelled)
    }

    /// Run `fut` unless the call fails or its deadline fires first.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, CallError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.failure()),
            _ = tokio::time::sleep_until(self.deadline.instant()) => {
                Err(self.fail(CallError::DeadlineExceeded))
            }
            out = fut => Ok(out),
        }
    }

    pub(crate) async fn terminal(&self) -> CallState {
        self.state.terminal().await
    }

    fn log_transition(&self, state: CallState) {
        debug!(call_id = %self.call_id, state = %state, "Bidi call state changed");
    }
}
