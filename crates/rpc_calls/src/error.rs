use thiserror::Error;
use tonic::{Code, Status};

/// Errors surfaced by any of the four call shapes.
///
/// Every variant is fatal to the call that produced it and to nothing else; the
/// channel the call was opened on stays usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CallError {
    /// The call deadline elapsed before the call reached a terminal state.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Connection or I/O level failure below the RPC layer.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The endpoint finished the call with an explicit failure status.
    #[error("remote failure ({code:?}): {message}")]
    RemoteFailure { code: Code, message: String },

    /// The caller violated the call-shape protocol, e.g. sending after half-close.
    #[error("invalid call state: {0}")]
    InvalidState(&'static str),

    /// The endpoint violated the expected call shape, e.g. no final response.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The call was cancelled locally before it completed.
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    /// Whether the failure originated below the RPC layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, CallError::TransportFailure(_))
    }

    /// The gRPC status code a remote failure carried, if any.
    pub fn remote_code(&self) -> Option<Code> {
        match self {
            CallError::RemoteFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        // Statuses synthesized from a local I/O error keep that error as their
        // source; statuses decoded from response trailers never have one.
        let local = std::error::Error::source(&status).is_some();

        match status.code() {
            Code::DeadlineExceeded => CallError::DeadlineExceeded,
            Code::Cancelled => CallError::Cancelled,
            Code::Unavailable => CallError::TransportFailure(status.message().to_owned()),
            _ if local => CallError::TransportFailure(status.message().to_owned()),
            code => CallError::RemoteFailure {
                code,
                message: status.message().to_owned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_status_maps_to_deadline() {
        let err = CallError::from(Status::deadline_exceeded("too slow"));
        assert_eq!(err, CallError::DeadlineExceeded);
    }

    #[test]
    fn test_unavailable_maps_to_transport() {
        let err = CallError::from(Status::unavailable("connection refused"));
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "transport failure: connection refused");
    }

    #[test]
    fn test_local_source_maps_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let status = Status::from_error(Box::new(io));
        assert!(CallError::from(status).is_transport());
    }

    #[test]
    fn test_remote_status_keeps_code() {
        let err = CallError::from(Status::not_found("no such person"));
        assert_eq!(err.remote_code(), Some(Code::NotFound));
        assert_eq!(
            err,
            CallError::RemoteFailure {
                code: Code::NotFound,
                message: "no such person".to_string(),
            }
        );
    }
}
