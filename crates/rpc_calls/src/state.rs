use std::fmt;

use tokio::sync::watch;

/// Lifecycle of a single call handle.
///
/// ```text
/// Open -> Active -> HalfClosed -> Draining -> Closed
///            \------------------/
/// any non-terminal state -> Failed
/// ```
///
/// `HalfClosed` means the caller finished sending while responses are still
/// arriving. `Draining` is entered when the receive half observes the
/// end-of-stream marker, whether or not the caller already half-closed. The
/// send half is told to stop there and the call moves on to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Created, neither direction has started.
    Open,
    /// Sending and receiving concurrently.
    Active,
    /// No more requests; the receive direction is still open.
    HalfClosed,
    /// End-of-stream observed; the send direction is being stopped.
    Draining,
    /// Both directions finished cleanly.
    Closed,
    /// Either direction failed, the deadline fired, or the call was cancelled.
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Closed | CallState::Failed)
    }

    /// State after the send direction finishes normally.
    fn after_send_finished(self) -> Option<CallState> {
        match self {
            CallState::Open | CallState::Active => Some(CallState::HalfClosed),
            CallState::Draining => Some(CallState::Closed),
            _ => None,
        }
    }

    /// State after the receive direction observes the end-of-stream marker.
    fn after_receive_finished(self) -> Option<CallState> {
        match self {
            CallState::Open | CallState::Active | CallState::HalfClosed => {
                Some(CallState::Draining)
            }
            _ => None,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Open => "open",
            CallState::Active => "sending+receiving",
            CallState::HalfClosed => "half-closed",
            CallState::Draining => "draining",
            CallState::Closed => "closed",
            CallState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared, awaitable state cell. Each transition runs under the watch lock.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<CallState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(CallState::Open);
        Self { tx }
    }

    pub(crate) fn get(&self) -> CallState {
        *self.tx.borrow()
    }

    /// Apply `step` atomically. Returns the new state if it changed.
    pub(crate) fn transition(
        &self,
        step: impl FnOnce(CallState) -> Option<CallState>,
    ) -> Option<CallState> {
        let mut next = None;
        self.tx.send_if_modified(|state| match step(*state) {
            Some(new) if new != *state => {
                *state = new;
                next = Some(new);
                true
            }
            _ => false,
        });
        next
    }

    pub(crate) fn activate(&self) -> Option<CallState> {
        self.transition(|state| (state == CallState::Open).then_some(CallState::Active))
    }

    pub(crate) fn finish_send(&self) -> Option<CallState> {
        self.transition(CallState::after_send_finished)
    }

    pub(crate) fn finish_receive(&self) -> Option<CallState> {
        self.transition(CallState::after_receive_finished)
    }

    /// `Draining -> Closed`, once the send half has been told to stop.
    pub(crate) fn close(&self) -> Option<CallState> {
        self.transition(|state| (state == CallState::Draining).then_some(CallState::Closed))
    }

    /// Move to `Failed` unless already terminal. Returns whether it moved.
    pub(crate) fn fail(&self) -> bool {
        self.transition(|state| (!state.is_terminal()).then_some(CallState::Failed))
            .is_some()
    }

    /// Suspend until the state is terminal.
    pub(crate) async fn terminal(&self) -> CallState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => CallState::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_close_then_end_of_stream() {
        let cell = StateCell::new();
        assert_eq!(cell.activate(), Some(CallState::Active));
        assert_eq!(cell.finish_send(), Some(CallState::HalfClosed));
        assert_eq!(cell.finish_receive(), Some(CallState::Draining));
        assert_eq!(cell.close(), Some(CallState::Closed));
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_end_of_stream_before_half_close_drains() {
        let cell = StateCell::new();
        cell.activate();
        assert_eq!(cell.finish_receive(), Some(CallState::Draining));
        assert_eq!(cell.finish_send(), Some(CallState::Closed));
        assert_eq!(cell.close(), None);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let cell = StateCell::new();
        assert!(cell.fail());
        assert!(!cell.fail());
        assert_eq!(cell.finish_send(), None);
        assert_eq!(cell.finish_receive(), None);
        assert_eq!(cell.activate(), None);
        assert_eq!(cell.close(), None);
        assert_eq!(cell.get(), CallState::Failed);
    }

    #[test]
    fn test_closed_cannot_fail() {
        let cell = StateCell::new();
        cell.finish_send();
        cell.finish_receive();
        cell.close();
        assert!(!cell.fail());
        assert_eq!(cell.get(), CallState::Closed);
    }

    #[tokio::test]
    async fn test_terminal_wakes_waiter() {
        let cell = std::sync::Arc::new(StateCell::new());
        let waiter = {
            let cell = std::sync::Arc::clone(&cell);
            tokio::spawn(async move { cell.terminal().await })
        };

        tokio::task::yield_now().await;
        cell.activate();
        cell.finish_send();
        cell.finish_receive();
        cell.close();

        assert_eq!(waiter.await.unwrap(), CallState::Closed);
    }
}
