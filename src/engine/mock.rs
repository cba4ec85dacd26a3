//! An engine answering requests from registered stubs, suitable for testing adapter behavior.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;

use super::{Engine, EngineOptions, EngineRequest, EngineResponse, ReturnCode};
use crate::BoxFuture;

/// A canned response for the [`MockEngine`].
///
/// Responses built with [`MockResponse::new`] are marked as mock responses. The failure
/// constructors produce what a real engine would report instead.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    reason: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
    return_code: ReturnCode,
    return_message: String,
    mock: bool,
}

impl MockResponse {
    /// A stubbed response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
            body: Bytes::new(),
            return_code: ReturnCode::Ok,
            return_message: "No error".into(),
            mock: true,
        }
    }

    /// A request which ran out of time.
    pub fn timed_out() -> Self {
        Self {
            return_code: ReturnCode::OperationTimedOut,
            return_message: "Operation timed out".into(),
            mock: false,
            ..Self::new(0)
        }
    }

    /// A request whose connection could not be established.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self {
            return_code: ReturnCode::CouldntConnect,
            return_message: message.into(),
            mock: false,
            ..Self::new(0)
        }
    }

    /// Set the reason phrase. Defaults to the canonical reason for the status.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Add a response header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the engine return code and message.
    pub fn return_code(mut self, code: ReturnCode, message: impl Into<String>) -> Self {
        self.return_code = code;
        self.return_message = message.into();
        self
    }

    /// Set whether the response is marked as a mock response.
    pub fn mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    /// Render the engine response this stub produces.
    pub fn to_engine_response(&self) -> EngineResponse {
        let mut headers = String::new();
        if self.status != 0 {
            let reason = self.reason.clone().unwrap_or_else(|| {
                StatusCode::from_u16(self.status)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .unwrap_or_default()
                    .to_owned()
            });
            let _ = write!(headers, "HTTP/1.1 {} {}\r\n", self.status, reason);
            for (name, value) in &self.headers {
                let _ = write!(headers, "{name}: {value}\r\n");
            }
            headers.push_str("\r\n");
        }

        EngineResponse {
            status: self.status,
            headers: Bytes::from(headers),
            body: self.body.clone(),
            return_code: self.return_code,
            return_message: self.return_message.clone(),
            mock: self.mock,
        }
    }
}

#[derive(Debug, Clone)]
struct Stub {
    method: Option<Method>,
    url: String,
    response: MockResponse,
    delay: Option<Duration>,
}

impl Stub {
    fn matches(&self, method: &Method, url: &str) -> bool {
        self.url == url && self.method.as_ref().map_or(true, |m| m == method)
    }
}

/// A request as seen by the [`MockEngine`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request method.
    pub method: Method,

    /// The target URL.
    pub url: String,

    /// The request headers.
    pub headers: HeaderMap,

    /// The request body.
    pub body: Bytes,

    /// The engine options the request was performed with.
    pub options: EngineOptions,
}

#[derive(Debug, Default)]
struct MockState {
    stubs: Vec<Stub>,
    requests: Vec<RecordedRequest>,
}

/// An [`Engine`] which answers from registered stubs and records every request.
///
/// Requests without a matching stub fail as if the connection had been refused.
/// When several stubs match, the most recently registered one wins.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    /// Create an engine without any stubs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start registering a stub for `url`.
    pub fn on(&self, url: impl Into<String>) -> StubBuilder<'_> {
        StubBuilder {
            engine: self,
            method: None,
            url: url.into(),
            delay: None,
        }
    }

    /// Every request performed so far, in the order they were started.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Forget all stubs and recorded requests.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.stubs.clear();
        state.requests.clear();
    }
}

impl Engine for MockEngine {
    fn perform(&self, request: &EngineRequest) -> BoxFuture<'static, EngineResponse> {
        let stub = {
            let mut state = self.state.lock();
            state.requests.push(RecordedRequest {
                method: request.method().clone(),
                url: request.url().to_owned(),
                headers: request.headers().clone(),
                body: request.body().clone(),
                options: request.options().clone(),
            });
            state
                .stubs
                .iter()
                .rev()
                .find(|stub| stub.matches(request.method(), request.url()))
                .cloned()
        };

        let Some(stub) = stub else {
            tracing::trace!(url = request.url(), "no stub registered");
            let message = format!("no stub registered for {} {}", request.method(), request.url());
            return Box::pin(std::future::ready(EngineResponse::failed(
                ReturnCode::CouldntConnect,
                message,
            )));
        };

        Box::pin(async move {
            if let Some(delay) = stub.delay {
                tokio::time::sleep(delay).await;
            }
            stub.response.to_engine_response()
        })
    }
}

/// Registers a stub on a [`MockEngine`].
#[derive(Debug)]
pub struct StubBuilder<'e> {
    engine: &'e MockEngine,
    method: Option<Method>,
    url: String,
    delay: Option<Duration>,
}

impl StubBuilder<'_> {
    /// Only match requests with this method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Wait before answering.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer matching requests with `response`.
    pub fn respond(self, response: MockResponse) {
        self.engine.state.lock().stubs.push(Stub {
            method: self.method,
            url: self.url,
            response,
            delay: self.delay,
        });
    }
}
