//! Transport engines.
//!
//! An [`Engine`] performs a single HTTP request described by an [`EngineRequest`] and reports
//! the result as an [`EngineResponse`]. Engines never return errors: transport failures are
//! reported through the response's [`ReturnCode`] and message, the way a low-level HTTP
//! library reports them, and it is up to the adapter to decide what they mean.
//!
//! Two engines are provided:
//! - [`HyperEngine`], which makes real HTTP/1.1 requests using [hyper] and [tokio].
#![cfg_attr(
    any(test, feature = "mocks"),
    doc = "- [`MockEngine`](mock::MockEngine), which answers requests from registered stubs."
)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use camino::Utf8PathBuf;
use http::{HeaderMap, Method};

use crate::options::TlsVersion;
use crate::BoxFuture;
use crate::Error;

mod conn;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;
mod tcp;
#[cfg(feature = "tls")]
mod tls;

pub use self::conn::{HyperEngine, HyperEngineConfig};

/// A transport engine which performs one request at a time.
pub trait Engine: Send + Sync + 'static {
    /// Perform the request, resolving once the engine has finished with it.
    fn perform(&self, request: &EngineRequest) -> BoxFuture<'static, EngineResponse>;
}

/// A shared, type-erased engine.
pub type SharedEngine = Arc<dyn Engine>;

impl<E> Engine for Arc<E>
where
    E: Engine + ?Sized,
{
    fn perform(&self, request: &EngineRequest) -> BoxFuture<'static, EngineResponse> {
        (**self).perform(request)
    }
}

/// Hostname verification level for TLS connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyHost {
    /// Do not check that the certificate matches the hostname.
    Off,

    /// Require the certificate to match the hostname.
    Strict,
}

/// Proxy authentication negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyAuth {
    /// Use whichever authentication method the engine supports.
    Any,

    /// HTTP Basic authentication.
    Basic,
}

/// Engine-native options for a single request.
///
/// Every field is optional; `None` means "use the engine default".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Verify the peer certificate chain.
    pub ssl_verify_peer: Option<bool>,

    /// Hostname verification level.
    pub ssl_verify_host: Option<VerifyHost>,

    /// TLS protocol version.
    pub ssl_version: Option<TlsVersion>,

    /// Client certificate path.
    pub ssl_cert: Option<Utf8PathBuf>,

    /// Client private key path.
    pub ssl_key: Option<Utf8PathBuf>,

    /// Client private key password.
    pub key_password: Option<String>,

    /// File of trusted certificate authorities.
    pub ca_info: Option<Utf8PathBuf>,

    /// Directory of trusted certificate authorities.
    pub ca_path: Option<Utf8PathBuf>,

    /// Proxy URI, as `scheme://host:port`.
    pub proxy: Option<String>,

    /// Proxy authentication mode.
    pub proxy_auth: Option<ProxyAuth>,

    /// Proxy credentials, as `user:password`.
    pub proxy_userpwd: Option<String>,

    /// Total request timeout, in milliseconds. `0` means no timeout.
    pub timeout_ms: Option<u64>,

    /// Connection timeout, in milliseconds. `0` means no timeout.
    pub connect_timeout_ms: Option<u64>,

    /// Local interface to bind outgoing connections to.
    pub interface: Option<String>,
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("ssl_verify_peer", &self.ssl_verify_peer)
            .field("ssl_verify_host", &self.ssl_verify_host)
            .field("ssl_version", &self.ssl_version)
            .field("ssl_cert", &self.ssl_cert)
            .field("ssl_key", &self.ssl_key)
            .field("key_password", &self.key_password.as_ref().map(|_| "<redacted>"))
            .field("ca_info", &self.ca_info)
            .field("ca_path", &self.ca_path)
            .field("proxy", &self.proxy)
            .field("proxy_auth", &self.proxy_auth)
            .field("proxy_userpwd", &self.proxy_userpwd.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("interface", &self.interface)
            .finish()
    }
}

macro_rules! merge_fields {
    ($target:ident, $defaults:ident, $($field:ident),+ $(,)?) => {
        $(
            if $target.$field.is_none() {
                $target.$field = $defaults.$field.clone();
            }
        )+
    };
}

impl EngineOptions {
    /// Fill every unset option from `defaults`.
    ///
    /// Options already set on `self` always win. The proxy settings are taken as a
    /// group: a request naming its own proxy never receives the default proxy's
    /// credentials or authentication mode.
    pub fn merge_defaults(&mut self, defaults: &EngineOptions) {
        merge_fields!(
            self,
            defaults,
            ssl_verify_peer,
            ssl_verify_host,
            ssl_version,
            ssl_cert,
            ssl_key,
            key_password,
            ca_info,
            ca_path,
            timeout_ms,
            connect_timeout_ms,
            interface,
        );

        if self.proxy.is_none() {
            self.proxy = defaults.proxy.clone();
            merge_fields!(self, defaults, proxy_auth, proxy_userpwd);
        }
    }

    /// The deadline for the whole request, if any.
    pub fn total_timeout(&self) -> Option<Duration> {
        deadline(self.timeout_ms)
    }

    /// The deadline for establishing the connection, if any.
    pub fn connect_timeout(&self) -> Option<Duration> {
        deadline(self.connect_timeout_ms)
    }

    /// Whether the peer certificate chain should be verified.
    pub fn verify_peer(&self) -> bool {
        self.ssl_verify_peer.unwrap_or(true)
    }

    /// Whether the certificate must match the hostname.
    pub fn verify_host(&self) -> bool {
        self.ssl_verify_host.unwrap_or(VerifyHost::Strict) == VerifyHost::Strict
    }
}

fn deadline(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|ms| *ms > 0).map(Duration::from_millis)
}

/// Low-level result of an engine request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReturnCode {
    /// The transfer completed.
    Ok,

    /// The URL could not be parsed or has an unsupported scheme.
    UrlMalformat,

    /// The host name could not be resolved.
    CouldntResolveHost,

    /// The proxy host name could not be resolved.
    CouldntResolveProxy,

    /// The connection to the host or proxy failed.
    CouldntConnect,

    /// The local interface could not be bound.
    InterfaceFailed,

    /// The deadline passed before the transfer finished.
    OperationTimedOut,

    /// The TLS handshake failed.
    SslConnectError,

    /// The peer certificate could not be verified.
    PeerFailedVerification,

    /// The client certificate could not be used.
    SslCertProblem,

    /// The trusted certificate authorities could not be loaded.
    SslCaCertBadFile,

    /// Sending the request failed.
    SendError,

    /// Receiving the response failed.
    RecvError,

    /// The server sent nothing.
    GotNothing,

    /// The engine does not support the request.
    UnsupportedProtocol,
}

impl ReturnCode {
    /// Whether this is the success code.
    pub fn is_ok(&self) -> bool {
        matches!(self, ReturnCode::Ok)
    }

    /// The symbolic name of the return code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnCode::Ok => "ok",
            ReturnCode::UrlMalformat => "url_malformat",
            ReturnCode::CouldntResolveHost => "couldnt_resolve_host",
            ReturnCode::CouldntResolveProxy => "couldnt_resolve_proxy",
            ReturnCode::CouldntConnect => "couldnt_connect",
            ReturnCode::InterfaceFailed => "interface_failed",
            ReturnCode::OperationTimedOut => "operation_timedout",
            ReturnCode::SslConnectError => "ssl_connect_error",
            ReturnCode::PeerFailedVerification => "peer_failed_verification",
            ReturnCode::SslCertProblem => "ssl_certproblem",
            ReturnCode::SslCaCertBadFile => "ssl_cacert_badfile",
            ReturnCode::SendError => "send_error",
            ReturnCode::RecvError => "recv_error",
            ReturnCode::GotNothing => "got_nothing",
            ReturnCode::UnsupportedProtocol => "unsupported_protocol",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an engine reports when it has finished a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResponse {
    /// The HTTP status code, or `0` if no response was received.
    pub status: u16,

    /// The raw response head, status line included, as received from the peer.
    pub headers: Bytes,

    /// The response body.
    pub body: Bytes,

    /// The low-level result code.
    pub return_code: ReturnCode,

    /// A human readable description of the return code.
    pub return_message: String,

    /// Whether this response was produced by a stub instead of the network.
    pub mock: bool,
}

impl EngineResponse {
    /// A response for a request which never received an answer.
    pub fn failed(code: ReturnCode, message: impl Into<String>) -> Self {
        Self {
            status: 0,
            headers: Bytes::new(),
            body: Bytes::new(),
            return_code: code,
            return_message: message.into(),
            mock: false,
        }
    }

    /// Whether the engine gave up because of a timeout.
    pub fn timed_out(&self) -> bool {
        self.return_code == ReturnCode::OperationTimedOut
    }
}

type OnFinish = Box<dyn FnOnce(EngineResponse) -> Result<(), Error> + Send + 'static>;

/// A request, ready to be performed by an [`Engine`].
pub struct EngineRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    options: EngineOptions,
    on_finish: Option<OnFinish>,
}

impl fmt::Debug for EngineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body.len())
            .field("options", &self.options)
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

impl EngineRequest {
    /// Create a new request for `url`.
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            url: url.into(),
            headers,
            body,
            options: EngineOptions::default(),
            on_finish: None,
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The engine options for this request.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Mutable access to the engine options for this request.
    pub fn options_mut(&mut self) -> &mut EngineOptions {
        &mut self.options
    }

    /// Register the callback to invoke when the request finishes, replacing any earlier one.
    pub fn on_finish<F>(&mut self, callback: F)
    where
        F: FnOnce(EngineResponse) -> Result<(), Error> + Send + 'static,
    {
        self.on_finish = Some(Box::new(callback));
    }

    /// Perform this request on `engine` and hand the response to the finish callback.
    ///
    /// Returns whatever the finish callback returns.
    pub async fn run<E>(mut self, engine: &E) -> Result<(), Error>
    where
        E: Engine + ?Sized,
    {
        let response = engine.perform(&self).await;
        tracing::trace!(
            url = %self.url,
            status = response.status,
            code = %response.return_code,
            "engine finished"
        );
        match self.on_finish.take() {
            Some(callback) => callback(response),
            None => Ok(()),
        }
    }
}
