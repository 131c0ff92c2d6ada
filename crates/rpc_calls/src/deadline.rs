use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::CallError;

// Stand-in for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// An absolute point in time after which a call is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    /// Default bound for a unary call.
    pub const UNARY: Duration = Duration::from_secs(10);

    /// Default bound for a whole server stream, long-lived feeds included.
    pub const SERVER_STREAM: Duration = Duration::from_secs(60 * 60);

    /// Default bound for client-streaming and bidirectional calls.
    pub const STREAMING: Duration = Duration::from_secs(60);

    /// A deadline `timeout` from now, capped at roughly thirty years.
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        Self(now.checked_add(timeout).unwrap_or(now + FAR_FUTURE))
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Propagate the remaining time to the endpoint as the `grpc-timeout` header.
    pub fn apply<T>(&self, mut request: tonic::Request<T>) -> tonic::Request<T> {
        request.set_timeout(self.remaining());
        request
    }

    /// Run `fut` to completion unless the deadline fires first.
    pub async fn run<T, F>(self, fut: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, CallError>>,
    {
        tokio::time::timeout_at(self.0, fut)
            .await
            .map_err(|_| CallError::DeadlineExceeded)?
    }
}
