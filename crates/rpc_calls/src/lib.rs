//! Client-side drivers for the four RPC call shapes.
//!
//! The drivers are transport independent: each one is opened with a closure
//! that starts the call on some transport and hands back the raw tonic
//! futures and streams. The driver then owns the call-shape contract: the
//! deadline, half-close, end-of-stream handling, and error classification.
//!
//! - [`unary::invoke`]: one request, one response.
//! - [`ServerStreamCall`]: one request, a finite sequence of responses.
//! - [`ClientStreamCall`]: a sequence of requests, one response after half-close.
//! - [`BidiCall`]: independent send and receive loops joined by
//!   [`BidiCompletion`].

mod bidi;
mod client_stream;
mod deadline;
mod error;
mod server_stream;
mod state;
pub mod unary;

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use tokio::sync::mpsc;
use tonic::Status;

pub use bidi::{BidiCall, BidiCompletion, BidiReceiver, BidiSender, CallCanceller};
pub use client_stream::ClientStreamCall;
pub use deadline::Deadline;
pub use error::CallError;
pub use server_stream::ServerStreamCall;
pub use state::CallState;

/// Outbound requests as handed to the transport.
pub type RequestStream<Req> = Pin<Box<dyn Stream<Item = Req> + Send>>;

/// Inbound responses as produced by the transport.
pub type ResponseStream<Resp> = Pin<Box<dyn Stream<Item = Result<Resp, Status>> + Send>>;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A bounded outbound buffer: the sending side for the caller, the stream side
/// for the transport. The stream ends once the sender is dropped.
pub(crate) fn outbound<Req>(capacity: usize) -> (mpsc::Sender<Req>, RequestStream<Req>)
where
    Req: Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let requests = async_stream::stream! {
        while let Some(request) = rx.recv().await {
            yield request;
        }
    };
    (tx, Box::pin(requests))
}
