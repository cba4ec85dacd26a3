use thiserror::Error;

use crate::engine::ReturnCode;
use crate::BoxError;

/// A failure reported by the transport engine.
///
/// Carries the engine's low-level return code and message unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct TransportFailure {
    code: ReturnCode,
    message: String,
}

impl TransportFailure {
    /// Create a failure from an engine return code and message.
    pub fn new(code: ReturnCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The engine return code.
    pub fn code(&self) -> ReturnCode {
        self.code
    }

    /// The engine return message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Adapter error type.
///
/// Only serial requests return transport errors; requests queued on a parallel
/// [`Manager`](crate::Manager) record them in their [`Completion`](crate::Completion).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request exceeded its configured deadline.
    #[error("request timed out: {0}")]
    Timeout(#[source] TransportFailure),

    /// The connection could not be established or broke before a response arrived.
    #[error("connection failed: {}", .0.message())]
    ConnectionFailed(#[source] TransportFailure),

    /// The request body could not be read.
    #[error("request body: {0}")]
    Body(#[source] BoxError),
}

impl Error {
    /// The transport failure behind this error, if any.
    pub fn failure(&self) -> Option<&TransportFailure> {
        match self {
            Error::Timeout(failure) | Error::ConnectionFailed(failure) => Some(failure),
            Error::Body(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Send, Sync, Into<BoxError>);
    assert_impl_all!(TransportFailure: std::error::Error, Send, Sync, Clone);

    #[test]
    fn connection_failed_displays_engine_message() {
        let error = Error::ConnectionFailed(TransportFailure::new(
            ReturnCode::CouldntConnect,
            "Couldn't connect to server",
        ));
        assert_eq!(
            error.to_string(),
            "connection failed: Couldn't connect to server"
        );
        assert_eq!(error.failure().unwrap().code(), ReturnCode::CouldntConnect);
    }
}
