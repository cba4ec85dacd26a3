//! Request bodies for the adapter.
//!
//! A [`RequestBody`] is either a concrete buffer or a lazily readable [`http_body::Body`]
//! stream. Transport engines only ever see concrete bytes: streams are read to the end
//! once, during translation, and replaced by the buffer they produced.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use http_body_util::BodyExt as _;
use http_body_util::{Empty, Full};

use crate::BoxError;

type BoxBody = Pin<Box<dyn http_body::Body<Data = Bytes, Error = BoxError> + Send + 'static>>;

/// The body of a request environment.
///
/// Bodies can be created from [`Bytes`], [`String`], [`Vec<u8>`] or `&'static str`
/// using [`From`] implementations, or from any [`http_body::Body`] with
/// [`RequestBody::stream`].
pub struct RequestBody {
    inner: InnerBody,
}

#[derive(Default)]
enum InnerBody {
    #[default]
    Empty,
    Full(Bytes),
    Stream(BoxBody),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            InnerBody::Empty => f.debug_tuple("RequestBody").field(&"empty").finish(),
            InnerBody::Full(bytes) => f.debug_tuple("RequestBody").field(&bytes.len()).finish(),
            InnerBody::Stream(_) => f.debug_tuple("RequestBody").field(&"stream").finish(),
        }
    }
}

impl RequestBody {
    /// Create a new empty body.
    pub fn empty() -> Self {
        Self {
            inner: InnerBody::Empty,
        }
    }

    /// Create a body which will be read from a stream when the request is translated.
    pub fn stream<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: InnerBody::Stream(Box::pin(body.map_err(Into::into))),
        }
    }

    /// Whether this body still has to be read from a stream.
    pub fn is_stream(&self) -> bool {
        matches!(self.inner, InnerBody::Stream(_))
    }

    /// The concrete bytes of this body, if it is not a stream.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match &self.inner {
            InnerBody::Empty => Some(Bytes::new()),
            InnerBody::Full(bytes) => Some(bytes.clone()),
            InnerBody::Stream(_) => None,
        }
    }

    /// Read the body into a single buffer.
    ///
    /// A stream body is consumed and replaced by the bytes it produced, so calling this
    /// again returns the same buffer without touching the stream. If reading fails, the
    /// body is left empty.
    pub async fn materialize(&mut self) -> Result<Bytes, BoxError> {
        match std::mem::take(&mut self.inner) {
            InnerBody::Empty => Ok(Bytes::new()),
            InnerBody::Full(bytes) => {
                self.inner = InnerBody::Full(bytes.clone());
                Ok(bytes)
            }
            InnerBody::Stream(stream) => {
                let bytes = stream.collect().await?.to_bytes();
                tracing::trace!(body.len = bytes.len(), "materialized stream body");
                self.inner = InnerBody::Full(bytes.clone());
                Ok(bytes)
            }
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(body: Bytes) -> Self {
        Self {
            inner: InnerBody::Full(body),
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(body: Vec<u8>) -> Self {
        Bytes::from(body).into()
    }
}

impl From<String> for RequestBody {
    fn from(body: String) -> Self {
        Bytes::from(body).into()
    }
}

impl From<&'static str> for RequestBody {
    fn from(body: &'static str) -> Self {
        Bytes::from_static(body.as_bytes()).into()
    }
}

impl From<Full<Bytes>> for RequestBody {
    fn from(body: Full<Bytes>) -> Self {
        Self::stream(body)
    }
}

impl From<Empty<Bytes>> for RequestBody {
    fn from(_body: Empty<Bytes>) -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use http_body::Frame;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(RequestBody: Send);

    /// A body yielding its chunks one frame at a time, counting every poll.
    struct CountingBody {
        chunks: Vec<&'static str>,
        polls: Arc<AtomicUsize>,
    }

    impl http_body::Body for CountingBody {
        type Data = Bytes;
        type Error = std::convert::Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.chunks.is_empty() {
                return Poll::Ready(None);
            }
            let chunk = self.chunks.remove(0);
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(chunk.as_bytes())))))
        }
    }

    #[tokio::test]
    async fn stream_body_is_read_once() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut body = RequestBody::stream(CountingBody {
            chunks: vec!["hello", ", ", "world"],
            polls: polls.clone(),
        });
        assert!(body.is_stream());
        assert_eq!(body.as_bytes(), None);

        let bytes = body.materialize().await.unwrap();
        assert_eq!(bytes, "hello, world");
        assert!(!body.is_stream());

        let seen = polls.load(Ordering::SeqCst);
        let again = body.materialize().await.unwrap();
        assert_eq!(again, "hello, world");
        assert_eq!(polls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn concrete_bodies() {
        let mut body = RequestBody::from("payload");
        assert_eq!(body.as_bytes().unwrap(), "payload");
        assert_eq!(body.materialize().await.unwrap(), "payload");

        let mut body = RequestBody::empty();
        assert!(body.materialize().await.unwrap().is_empty());
    }
}
