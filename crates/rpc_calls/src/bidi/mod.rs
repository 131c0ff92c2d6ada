//! Bidirectional streaming.
//!
//! A [`BidiCall`] splits into a [`BidiSender`] and a [`BidiReceiver`] that run
//! as independent loops, plus a [`BidiCompletion`] that joins them:
//!
//! ```ignore
//! let (sender, receiver, completion) = call.split();
//! let send_loop = tokio::spawn(sender.send_all(requests));
//! let receive_loop = tokio::spawn(receiver.receive_all());
//!
//! completion.wait().await?;
//! ```
//!
//! The two halves share one state cell and one cancellation token. A failure
//! in either direction, an expired deadline, or an explicit cancel moves the
//! call to `Failed` and wakes whichever half is suspended.

mod context;
mod receiver;
mod sender;

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tonic::Status;
use uuid::Uuid;

use crate::deadline::Deadline;
use crate::error::CallError;
use crate::state::CallState;
use crate::{RequestStream, ResponseStream, outbound};
use context::CallContext;

pub use receiver::BidiReceiver;
pub use sender::BidiSender;

/// A bidirectional streaming call in state `Open`.
pub struct BidiCall<Req, Resp> {
    sender: BidiSender<Req>,
    receiver: BidiReceiver<Resp>,
    completion: BidiCompletion,
}

impl<Req, Resp> BidiCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Open the call. `call` receives the outbound request stream and resolves
    /// to the inbound response stream.
    ///
    /// `call` is not awaited here: it is driven by the receive half, so requests
    /// can be queued before the endpoint answers.
    pub fn open<C, F, S>(deadline: Deadline, capacity: usize, call: C) -> Self
    where
        C: FnOnce(RequestStream<Req>) -> F,
        F: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    {
        let ctx = Arc::new(CallContext::new(deadline));
        let (tx, requests) = outbound(capacity);

        let opening = call(requests);
        let inbound: ResponseStream<Resp> = Box::pin(async_stream::stream! {
            match opening.await {
                Ok(stream) => {
                    let mut stream = Box::pin(stream);
                    while let Some(item) = stream.next().await {
                        yield item;
                    }
                }
                Err(status) => yield Err(status),
            }
        });

        tracing::debug!(
            call_id = %ctx.call_id,
            timeout = ?deadline.remaining(),
            "Bidi call opened"
        );

        Self {
            sender: BidiSender::new(Arc::clone(&ctx), tx),
            receiver: BidiReceiver::new(Arc::clone(&ctx), inbound),
            completion: BidiCompletion { ctx },
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.completion.ctx.call_id
    }

    pub fn state(&self) -> CallState {
        self.completion.state()
    }

    pub fn canceller(&self) -> CallCanceller {
        self.completion.canceller()
    }

    /// Split into the send half, the receive half, and the completion waiter.
    pub fn split(self) -> (BidiSender<Req>, BidiReceiver<Resp>, BidiCompletion) {
        (self.sender, self.receiver, self.completion)
    }

    /// Run the send loop and the receive loop concurrently on the current
    /// task, then wait for completion. Returns every response received.
    pub async fn exchange<S>(self, requests: S) -> Result<Vec<Resp>, CallError>
    where
        S: Stream<Item = Req>,
    {
        let (sender, receiver, completion) = self.split();
        let (sent, received) = tokio::join!(sender.send_all(requests), receiver.receive_all());

        completion.wait().await?;
        sent?;
        received
    }
}

/// Waits for both directions of a [`BidiCall`] to finish.
pub struct BidiCompletion {
    ctx: Arc<CallContext>,
}

impl BidiCompletion {
    pub fn state(&self) -> CallState {
        self.ctx.state()
    }

    pub fn canceller(&self) -> CallCanceller {
        CallCanceller {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Resolve once the receive half has observed the end marker (`Ok`), or
    /// once the call failed (`Err` with the first failure of either
    /// direction).
    ///
    /// The end marker tells the send half to stop, so a sender that is still
    /// held but idle does not keep the call open.
    pub async fn wait(self) -> Result<(), CallError> {
        let state = match self.ctx.state() {
            state if state.is_terminal() => state,
            _ => self.ctx.guard(self.ctx.terminal()).await?,
        };

        match state {
            CallState::Closed => Ok(()),
            _ => Err(self.ctx.failure()),
        }
    }
}

/// Cancels a bidirectional call from any task.
#[derive(Clone)]
pub struct CallCanceller {
    ctx: Arc<CallContext>,
}

impl CallCanceller {
    /// Fail the call with `Cancelled` and release both loops. No effect once
    /// the call is terminal.
    pub fn cancel(&self) {
        self.ctx.fail(CallError::Cancelled);
    }

    pub fn state(&self) -> CallState {
        self.ctx.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tonic::Code;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    fn channel_stream<T: Send + 'static>(
        mut rx: mpsc::Receiver<T>,
    ) -> impl Stream<Item = T> + Send + 'static {
        async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }
    }

    /// Answers every request with its string form.
    fn echo_call(capacity: usize) -> BidiCall<u32, String> {
        BidiCall::open(deadline(), capacity, |requests| async move {
            Ok(requests.map(|n: u32| Ok(n.to_string())))
        })
    }

    /// Greets before reading anything, then answers request `n` with `n % 3`
    /// responses while later requests are still arriving.
    fn interleaving_call(capacity: usize) -> BidiCall<u32, String> {
        BidiCall::open(deadline(), capacity, |mut requests| async move {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                if tx.send(Ok("hello".to_string())).await.is_err() {
                    return;
                }
                while let Some(n) = requests.next().await {
                    for k in 0..n % 3 {
                        if tx.send(Ok(format!("{n}.{k}"))).await.is_err() {
                            return;
                        }
                    }
                }
            });
            Ok(channel_stream(rx))
        })
    }

    /// Holds the request stream without reading it and never answers.
    fn silent_call(deadline: Deadline) -> BidiCall<u32, String> {
        BidiCall::open(deadline, 1, |requests| async move {
            Ok(async_stream::stream! {
                let _requests = requests;
                std::future::pending::<()>().await;
                yield Ok(String::new());
            })
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_independent_loops_do_not_deadlock() {
        let call = interleaving_call(1);
        let (sender, receiver, completion) = call.split();

        let send_loop = tokio::spawn(sender.send_all(stream::iter(1..=10u32)));
        let receive_loop = tokio::spawn(receiver.receive_all());

        assert_eq!(send_loop.await.unwrap(), Ok(10));
        let responses = receive_loop.await.unwrap().unwrap();
        assert_eq!(completion.wait().await, Ok(()));

        // One greeting plus n % 3 answers for n in 1..=10.
        assert_eq!(responses.len(), 11);
        assert_eq!(responses[0], "hello");
    }

    #[tokio::test]
    async fn test_order_preserved_within_each_direction() {
        let responses = echo_call(2)
            .exchange(stream::iter(vec![3u32, 1, 4, 1, 5]))
            .await
            .unwrap();
        assert_eq!(responses, vec!["3", "1", "4", "1", "5"]);
    }

    #[tokio::test]
    async fn test_half_close_keeps_receiving() {
        let (mut sender, mut receiver, completion) = echo_call(4).split();

        sender.send(1).await.unwrap();
        sender.send(2).await.unwrap();
        sender.half_close();
        assert_eq!(completion.state(), CallState::HalfClosed);

        let err = sender.send(3).await.unwrap_err();
        assert_eq!(err, CallError::InvalidState("send after half-close"));

        assert_eq!(receiver.message().await, Ok(Some("1".to_string())));
        assert_eq!(receiver.message().await, Ok(Some("2".to_string())));
        assert_eq!(receiver.message().await, Ok(None));
        assert_eq!(receiver.message().await, Ok(None));

        assert_eq!(completion.state(), CallState::Closed);
        assert_eq!(completion.wait().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_unblocks_blocked_sender() {
        let call: BidiCall<u32, String> = BidiCall::open(deadline(), 1, |requests| async move {
            Ok(async_stream::stream! {
                let _requests = requests;
                tokio::time::sleep(Duration::from_millis(50)).await;
                yield Err(Status::unavailable("connection reset"));
            })
        });
        let (sender, receiver, completion) = call.split();

        let send_loop = tokio::spawn(sender.send_all(stream::iter(0..100u32)));
        let receive_loop = tokio::spawn(receiver.receive_all());

        let send_err = send_loop.await.unwrap().unwrap_err();
        let receive_err = receive_loop.await.unwrap().unwrap_err();
        let completion_err = completion.wait().await.unwrap_err();

        assert!(receive_err.is_transport());
        assert_eq!(send_err, receive_err);
        assert_eq!(completion_err, receive_err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_releases_both_loops() {
        let call = silent_call(Deadline::after(Duration::from_secs(5)));
        let canceller = call.canceller();
        let (sender, receiver, completion) = call.split();

        let send_loop = tokio::spawn(sender.send_all(stream::iter(0..100u32)));
        let receive_loop = tokio::spawn(receiver.receive_all());

        assert_eq!(send_loop.await.unwrap(), Err(CallError::DeadlineExceeded));
        assert_eq!(receive_loop.await.unwrap(), Err(CallError::DeadlineExceeded));
        assert_eq!(completion.wait().await, Err(CallError::DeadlineExceeded));
        assert_eq!(canceller.state(), CallState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_alone_observes_deadline() {
        let call = silent_call(Deadline::after(Duration::from_secs(5)));
        let (_sender, _receiver, completion) = call.split();

        assert_eq!(completion.wait().await, Err(CallError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_releases_receiver() {
        let call = silent_call(deadline());
        let canceller = call.canceller();
        let (_sender, mut receiver, completion) = call.split();

        let receive = tokio::spawn(async move { receiver.message().await });
        tokio::task::yield_now().await;
        canceller.cancel();

        assert_eq!(receive.await.unwrap(), Err(CallError::Cancelled));
        assert_eq!(completion.wait().await, Err(CallError::Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_sender() {
        let call = silent_call(deadline());
        let (sender, receiver, completion) = call.split();

        let send_loop = tokio::spawn(sender.send_all(stream::iter(0..100u32)));
        tokio::task::yield_now().await;
        drop(receiver);

        assert_eq!(send_loop.await.unwrap(), Err(CallError::Cancelled));
        assert_eq!(completion.wait().await, Err(CallError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_stream_completes_with_idle_sender_alive() {
        let call: BidiCall<u32, String> = BidiCall::open(deadline(), 4, |requests| async move {
            Ok(async_stream::stream! {
                let _requests = requests;
                yield Ok("bye".to_string());
            })
        });
        let (mut sender, receiver, completion) = call.split();
        let started = tokio::time::Instant::now();

        sender.send(1).await.unwrap();
        assert_eq!(receiver.receive_all().await, Ok(vec!["bye".to_string()]));
        assert_eq!(completion.state(), CallState::Closed);

        // The sender is still held, yet completion resolves before the deadline.
        assert_eq!(completion.wait().await, Ok(()));
        assert_eq!(started.elapsed(), Duration::ZERO);

        let err = sender.send(2).await.unwrap_err();
        assert_eq!(err, CallError::InvalidState("endpoint already ended the stream"));
    }

    #[tokio::test]
    async fn test_send_loop_stops_when_endpoint_ends_stream() {
        let call: BidiCall<u32, String> = BidiCall::open(deadline(), 1, |mut requests| async move {
            let first = requests.next().await;
            Ok(stream::iter(first.map(|n| Ok(format!("only {n}")))))
        });

        let responses = call
            .exchange(stream::iter(1..=3u32).chain(stream::pending()))
            .await
            .unwrap();
        assert_eq!(responses, vec!["only 1"]);
    }

    #[tokio::test]
    async fn test_rejected_open_fails_call() {
        let call: BidiCall<u32, String> = BidiCall::open(deadline(), 1, |_requests| async move {
            Err::<stream::Empty<Result<String, Status>>, _>(Status::unauthenticated("no token"))
        });

        let err = call.exchange(stream::iter(vec![1u32])).await.unwrap_err();
        assert_eq!(err.remote_code(), Some(Code::Unauthenticated));
    }
}
