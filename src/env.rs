//! The request environment passed through the pipeline.

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::body::RequestBody;
use crate::completion::Completion;
use crate::manager::Manager;
use crate::options::RequestOptions;
use crate::response::Response;
use crate::BoxError;

/// Everything known about a single request as it flows through the pipeline.
///
/// The environment is owned by the pipeline and passed by value to the
/// [`Adapter`](crate::Adapter), which hands it back once the request is dispatched.
#[derive(Debug)]
pub struct Env {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: RequestBody,
    options: RequestOptions,
    manager: Option<Manager>,
    completion: Completion,
}

impl Env {
    /// Create an environment for a request without headers or body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
            options: RequestOptions::default(),
            manager: None,
            completion: Completion::new(),
        }
    }

    /// Create an environment for a `GET` request.
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Create an environment from an [`http::Request`].
    ///
    /// The body is read lazily when the request is translated. [`RequestOptions`] and a
    /// [`Manager`] found in the request extensions are carried over.
    pub fn from_request<B>(request: http::Request<B>) -> Self
    where
        B: http_body::Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = request.into_parts();
        let options = parts.extensions.remove::<RequestOptions>().unwrap_or_default();
        let manager = parts.extensions.remove::<Manager>();

        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: RequestBody::stream(body),
            options,
            manager,
            completion: Completion::new(),
        }
    }

    /// Append a request header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the request headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the request options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Queue this request on a parallel manager instead of running it immediately.
    pub fn with_manager(mut self, manager: Manager) -> Self {
        self.manager = Some(manager);
        self
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The request body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Mutable access to the request body.
    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// The request options.
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Mutable access to the request options.
    pub fn options_mut(&mut self) -> &mut RequestOptions {
        &mut self.options
    }

    /// The parallel manager, if this request should be batched.
    pub fn manager(&self) -> Option<&Manager> {
        self.manager.as_ref()
    }

    /// Whether this request will be queued on a parallel manager.
    pub fn parallel(&self) -> bool {
        self.manager.is_some()
    }

    /// The completion state shared with the transport.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    /// The response, once the request has completed.
    pub fn response(&self) -> Option<&Response> {
        self.completion.response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::manager::ManagerConfig;

    assert_impl_all!(Env: Send);

    #[test]
    fn builder() {
        let env = Env::new(Method::POST, Uri::from_static("http://example.com/upload"))
            .with_header(http::header::ACCEPT, HeaderValue::from_static("text/plain"))
            .with_header(http::header::ACCEPT, HeaderValue::from_static("text/html"))
            .with_body("payload")
            .with_options(RequestOptions::default().with_timeout(1.5));

        assert_eq!(env.method(), Method::POST);
        assert_eq!(env.headers().get_all(http::header::ACCEPT).iter().count(), 2);
        assert_eq!(env.body().as_bytes().unwrap(), "payload");
        assert_eq!(env.options().timeout, Some(1.5));
        assert!(!env.parallel());
        assert!(env.response().is_none());
    }

    #[test]
    fn from_request_reads_extensions() {
        let manager = Manager::setup(Arc::new(MockEngine::new()), ManagerConfig::default());
        let request = http::Request::builder()
            .method(Method::PUT)
            .uri("http://example.com/item")
            .header("x-trace", "1")
            .extension(RequestOptions::default().with_open_timeout(0.25))
            .extension(manager)
            .body(http_body_util::Full::new(bytes::Bytes::from_static(b"item")))
            .unwrap();

        let env = Env::from_request(request);
        assert_eq!(env.method(), Method::PUT);
        assert_eq!(env.uri().path(), "/item");
        assert_eq!(env.headers().get("x-trace").unwrap(), "1");
        assert!(env.body().is_stream());
        assert_eq!(env.options().open_timeout, Some(0.25));
        assert!(env.parallel());
    }
}
