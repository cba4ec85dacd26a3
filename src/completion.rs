//! Per-request completion state.
//!
//! A [`Completion`] is shared between a request environment and the callback which the
//! engine invokes when the request finishes. It records the [`Response`] and the
//! [`Outcome`] exactly once, and signals waiters when the request is finished.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::sync::watch;

use crate::error::TransportFailure;
use crate::response::Response;
use crate::BoxFuture;

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The engine received a response. The status may still be an HTTP error.
    Completed,

    /// The request exceeded its deadline.
    TimedOut(TransportFailure),

    /// The connection could not be established or no response was received.
    ConnectionFailed(TransportFailure),
}

impl Outcome {
    /// The transport failure, unless the request completed.
    pub fn failure(&self) -> Option<&TransportFailure> {
        match self {
            Outcome::Completed => None,
            Outcome::TimedOut(failure) | Outcome::ConnectionFailed(failure) => Some(failure),
        }
    }
}

#[derive(Debug)]
struct Record {
    response: Response,
    outcome: Outcome,
}

#[derive(Debug)]
struct CompletionRef {
    record: OnceLock<Record>,
    finished: watch::Sender<bool>,
}

/// The response slot of a single request.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionRef>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("outcome", &self.outcome())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl Completion {
    /// Create an empty completion.
    pub fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(CompletionRef {
                record: OnceLock::new(),
                finished,
            }),
        }
    }

    /// Record the response and outcome.
    ///
    /// Only the first record is kept. Returns `false` if one was already present.
    pub fn record(&self, response: Response, outcome: Outcome) -> bool {
        let mut written = false;
        self.inner.record.get_or_init(|| {
            written = true;
            Record { response, outcome }
        });

        if !written {
            tracing::warn!("request completed more than once, ignoring the later response");
        }
        written
    }

    /// Mark the request finished, waking every waiter.
    ///
    /// Only the first call has an effect.
    pub fn finish(&self) {
        self.inner.finished.send_if_modified(|finished| {
            if *finished {
                false
            } else {
                *finished = true;
                true
            }
        });
    }

    /// Whether the request has been marked finished.
    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow()
    }

    /// Wait until the request is marked finished.
    pub fn finished(&self) -> Finished {
        let inner = self.inner.clone();
        Finished(Box::pin(async move {
            let mut receiver = inner.finished.subscribe();
            let _ = receiver.wait_for(|finished| *finished).await;
        }))
    }

    /// The recorded response, once the request completed.
    pub fn response(&self) -> Option<&Response> {
        self.inner.record.get().map(|record| &record.response)
    }

    /// The recorded outcome, once the request completed.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.inner.record.get().map(|record| &record.outcome)
    }

    /// Whether the request timed out.
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome(), Some(Outcome::TimedOut(_)))
    }

    /// Whether the connection failed.
    pub fn connection_failed(&self) -> bool {
        matches!(self.outcome(), Some(Outcome::ConnectionFailed(_)))
    }

    /// The engine's message for a failed request.
    pub fn return_message(&self) -> Option<&str> {
        self.failure().map(TransportFailure::message)
    }

    /// The transport failure of a failed request.
    pub fn failure(&self) -> Option<&TransportFailure> {
        self.outcome().and_then(Outcome::failure)
    }
}

/// Future returned by [`Completion::finished`].
#[pin_project::pin_project]
pub struct Finished(#[pin] BoxFuture<'static, ()>);

impl fmt::Debug for Finished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Finished").finish()
    }
}

impl Future for Finished {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().0.poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::engine::ReturnCode;

    assert_impl_all!(Completion: Send, Sync, Clone);
    assert_impl_all!(Finished: Send);

    #[test]
    fn records_once() {
        let completion = Completion::new();
        assert!(completion.response().is_none());

        let first = Response::new(200, "OK", Default::default(), "first".into());
        let second = Response::new(500, "Oops", Default::default(), "second".into());
        assert!(completion.record(first, Outcome::Completed));
        assert!(!completion.record(second, Outcome::Completed));

        assert_eq!(completion.response().unwrap().status(), 200);
        assert_eq!(completion.outcome(), Some(&Outcome::Completed));
        assert!(!completion.timed_out());
        assert!(!completion.connection_failed());
        assert!(completion.return_message().is_none());
    }

    #[test]
    fn failure_flags() {
        let completion = Completion::new();
        let failure = TransportFailure::new(ReturnCode::CouldntConnect, "refused");
        completion.record(Response::default(), Outcome::ConnectionFailed(failure));

        assert!(completion.connection_failed());
        assert!(!completion.timed_out());
        assert_eq!(completion.return_message(), Some("refused"));
    }

    #[tokio::test]
    async fn finished_wakes_waiters() {
        let completion = Completion::new();
        let waiter = tokio::spawn(completion.finished());

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        completion.finish();
        completion.finish();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();

        assert!(completion.is_finished());
        completion.finished().await;
    }

    #[tokio::test]
    async fn finish_fires_once() {
        let completion = Completion::new();
        let mut receiver = completion.inner.finished.subscribe();

        completion.finish();
        assert!(receiver.has_changed().unwrap());
        receiver.borrow_and_update();

        completion.finish();
        assert!(!receiver.has_changed().unwrap());
    }
}
