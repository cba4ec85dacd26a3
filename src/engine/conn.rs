//! An [`Engine`] making real HTTP/1.1 requests with [hyper].

#[cfg(feature = "tls")]
use std::sync::OnceLock;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use bytes::{BufMut as _, Bytes, BytesMut};
use http::header::{HOST, PROXY_AUTHORIZATION, USER_AGENT};
use http::uri::{Port, Scheme};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use http_body_util::{BodyExt as _, Empty, Full};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, Instrument};

use super::tcp::{self, TcpOptions};
#[cfg(feature = "tls")]
use super::tls;
use super::{Engine, EngineOptions, EngineRequest, EngineResponse, ReturnCode};
use crate::{BoxFuture, TransportFailure};

trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxIo = Box<dyn Io>;

/// Configuration for the [`HyperEngine`].
#[derive(Debug, Clone)]
pub struct HyperEngineConfig {
    /// TCP keep-alive idle time for new connections.
    pub keep_alive: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// `User-Agent` sent when the request does not carry one.
    pub user_agent: Option<HeaderValue>,
}

impl Default for HyperEngineConfig {
    fn default() -> Self {
        Self {
            keep_alive: Some(Duration::from_secs(90)),
            nodelay: true,
            user_agent: Some(HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))),
        }
    }
}

/// A transport engine making HTTP/1.1 requests over TCP, optionally with TLS.
///
/// Every request uses a fresh connection. Options understood by the engine:
///
/// - `timeout_ms` bounds the whole request, `connect_timeout_ms` bounds DNS resolution,
///   connecting, proxy tunnelling and the TLS handshake. A value of `0` sets no limit.
/// - `interface` must be a local IP address; the connection is bound to it.
/// - `proxy` must be an `http://` proxy. Plain requests are sent in absolute form,
///   `https` requests through a `CONNECT` tunnel. Credentials are sent with Basic
///   authentication, which is also what [`ProxyAuth::Any`](super::ProxyAuth::Any) selects.
/// - The `ssl_*` and `ca_*` options configure [rustls] (with the `tls` feature).
#[derive(Debug, Clone, Default)]
pub struct HyperEngine {
    config: Arc<HyperEngineConfig>,
    #[cfg(feature = "tls")]
    default_tls: Arc<OnceLock<Arc<rustls::ClientConfig>>>,
}

impl HyperEngine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with the given configuration.
    pub fn with_config(config: HyperEngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            #[cfg(feature = "tls")]
            default_tls: Default::default(),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &HyperEngineConfig {
        &self.config
    }
}

/// The parts of an [`EngineRequest`] the engine needs to own while it runs.
#[derive(Debug)]
struct Exchange {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    options: EngineOptions,
}

impl Engine for HyperEngine {
    fn perform(&self, request: &EngineRequest) -> BoxFuture<'static, EngineResponse> {
        let exchange = Exchange {
            method: request.method().clone(),
            url: request.url().to_owned(),
            headers: request.headers().clone(),
            body: request.body().clone(),
            options: request.options().clone(),
        };

        let engine = self.clone();
        let span = tracing::debug_span!("perform", method = %exchange.method, url = %exchange.url);
        Box::pin(async move { engine.execute(exchange).await }.instrument(span))
    }
}

impl HyperEngine {
    async fn execute(self, exchange: Exchange) -> EngineResponse {
        let result = match exchange.options.total_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.exchange(exchange))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportFailure::new(
                        ReturnCode::OperationTimedOut,
                        format!("Operation timed out after {} milliseconds", limit.as_millis()),
                    ))
                }),
            None => self.exchange(exchange).await,
        };

        match result {
            Ok(response) => response,
            Err(failure) => {
                debug!(code = %failure.code(), message = failure.message(), "request failed");
                EngineResponse::failed(failure.code(), failure.message())
            }
        }
    }

    async fn exchange(&self, exchange: Exchange) -> Result<EngineResponse, TransportFailure> {
        let Exchange {
            method,
            url,
            mut headers,
            body,
            options,
        } = exchange;

        let uri: Uri = url.parse().map_err(|error| {
            TransportFailure::new(ReturnCode::UrlMalformat, format!("URL rejected: {error}"))
        })?;
        let (host, port) = tcp::get_host_and_port(&uri)?;
        let secure = is_schema_secure(&uri);
        let proxy = options.proxy.as_deref().map(Proxy::parse).transpose()?;
        let proxy_auth = proxy_authorization(&options)?;

        let tcp_options = TcpOptions {
            interface: options
                .interface
                .as_deref()
                .map(tcp::parse_interface)
                .transpose()?,
            keep_alive: self.config.keep_alive,
            nodelay: self.config.nodelay,
        };

        let connecting = self.open(
            &host,
            port,
            secure,
            proxy.as_ref(),
            proxy_auth.as_ref(),
            &tcp_options,
            &options,
        );
        let stream = match options.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| {
                    TransportFailure::new(
                        ReturnCode::OperationTimedOut,
                        format!("Connection timed out after {} milliseconds", limit.as_millis()),
                    )
                })??,
            None => connecting.await?,
        };

        let forward_through_proxy = proxy.is_some() && !secure;

        set_host_header(&mut headers, &uri);
        if let Some(agent) = &self.config.user_agent {
            headers.entry(USER_AGENT).or_insert_with(|| agent.clone());
        }
        if forward_through_proxy {
            if let Some(auth) = proxy_auth {
                headers.insert(PROXY_AUTHORIZATION, auth);
            }
        }

        let target = if forward_through_proxy {
            uri.clone()
        } else {
            origin_form(&uri)
        };

        let mut request = http::Request::new(Full::new(body));
        *request.method_mut() = method;
        *request.uri_mut() = target;
        *request.headers_mut() = headers;

        send(stream, request).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn open(
        &self,
        host: &str,
        port: u16,
        secure: bool,
        proxy: Option<&Proxy>,
        proxy_auth: Option<&HeaderValue>,
        tcp_options: &TcpOptions,
        options: &EngineOptions,
    ) -> Result<BoxIo, TransportFailure> {
        match proxy {
            Some(proxy) => {
                let stream = tcp::connect(
                    &proxy.host,
                    proxy.port,
                    tcp_options,
                    ReturnCode::CouldntResolveProxy,
                )
                .await?;
                trace!(proxy.host = %proxy.host, proxy.port, "connected to proxy");

                if secure {
                    let tunnel = tunnel(stream, host, port, proxy_auth).await?;
                    self.secure(Box::new(tunnel), host, options).await
                } else {
                    Ok(Box::new(stream))
                }
            }
            None => {
                let stream =
                    tcp::connect(host, port, tcp_options, ReturnCode::CouldntResolveHost).await?;
                if secure {
                    self.secure(Box::new(stream), host, options).await
                } else {
                    Ok(Box::new(stream))
                }
            }
        }
    }

    #[cfg(feature = "tls")]
    async fn secure(
        &self,
        stream: BoxIo,
        host: &str,
        options: &EngineOptions,
    ) -> Result<BoxIo, TransportFailure> {
        let config = self.tls_config(options)?;
        let stream = tls::handshake(stream, host, config).await?;
        trace!(%host, "tls handshake complete");
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "tls"))]
    async fn secure(
        &self,
        _stream: BoxIo,
        _host: &str,
        _options: &EngineOptions,
    ) -> Result<BoxIo, TransportFailure> {
        Err(TransportFailure::new(
            ReturnCode::UnsupportedProtocol,
            "Protocol \"https\" not supported: built without TLS support",
        ))
    }

    #[cfg(feature = "tls")]
    fn tls_config(
        &self,
        options: &EngineOptions,
    ) -> Result<Arc<rustls::ClientConfig>, TransportFailure> {
        if !tls::is_default(options) {
            return tls::client_config(options).map(Arc::new);
        }

        if let Some(config) = self.default_tls.get() {
            return Ok(config.clone());
        }

        let config = Arc::new(tls::client_config(options)?);
        let _ = self.default_tls.set(config.clone());
        Ok(config)
    }
}

/// Send the request over a fresh HTTP/1.1 connection and read the whole response.
async fn send(
    stream: BoxIo,
    request: http::Request<Full<Bytes>>,
) -> Result<EngineResponse, TransportFailure> {
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|error| {
            TransportFailure::new(ReturnCode::CouldntConnect, format!("handshake: {error}"))
        })?;

    tokio::spawn(
        async move {
            if let Err(error) = conn.await {
                trace!(%error, "connection closed with error");
            }
        }
        .in_current_span(),
    );

    trace!(request.uri = %request.uri(), "sending request");
    let response = sender.send_request(request).await.map_err(request_failure)?;

    let (parts, body) = response.into_parts();
    let reason = parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .map(|reason| reason.as_bytes())
        .or_else(|| parts.status.canonical_reason().map(str::as_bytes))
        .unwrap_or_default();
    let headers = header_blob(parts.version, parts.status, reason, &parts.headers);

    let body = body
        .collect()
        .await
        .map_err(|error| {
            TransportFailure::new(
                ReturnCode::RecvError,
                format!("Failure when receiving data from the peer: {error}"),
            )
        })?
        .to_bytes();

    trace!(status = parts.status.as_u16(), body.len = body.len(), "response received");

    Ok(EngineResponse {
        status: parts.status.as_u16(),
        headers,
        body,
        return_code: ReturnCode::Ok,
        return_message: "No error".into(),
        mock: false,
    })
}

fn request_failure(error: hyper::Error) -> TransportFailure {
    if error.is_incomplete_message() {
        TransportFailure::new(ReturnCode::GotNothing, "Empty reply from server")
    } else if error.is_parse() {
        TransportFailure::new(
            ReturnCode::RecvError,
            format!("Failure when receiving data from the peer: {error}"),
        )
    } else {
        TransportFailure::new(
            ReturnCode::SendError,
            format!("Failed sending data to the peer: {error}"),
        )
    }
}

/// Open a `CONNECT` tunnel to `host:port` through an HTTP proxy.
async fn tunnel(
    stream: tokio::net::TcpStream,
    host: &str,
    port: u16,
    auth: Option<&HeaderValue>,
) -> Result<TokioIo<hyper::upgrade::Upgraded>, TransportFailure> {
    let failed = |message: String| TransportFailure::new(ReturnCode::CouldntConnect, message);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|error| failed(format!("proxy handshake: {error}")))?;

    tokio::spawn(
        async move {
            if let Err(error) = conn.with_upgrades().await {
                trace!(%error, "proxy tunnel closed with error");
            }
        }
        .in_current_span(),
    );

    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };

    let mut request = http::Request::new(Empty::<Bytes>::new());
    *request.method_mut() = Method::CONNECT;
    *request.uri_mut() = authority
        .parse()
        .map_err(|error| failed(format!("invalid tunnel target {authority}: {error}")))?;
    request.headers_mut().insert(
        HOST,
        HeaderValue::from_str(&authority)
            .map_err(|error| failed(format!("invalid tunnel target {authority}: {error}")))?,
    );
    if let Some(auth) = auth {
        request.headers_mut().insert(PROXY_AUTHORIZATION, auth.clone());
    }

    let response = sender
        .send_request(request)
        .await
        .map_err(|error| failed(format!("proxy CONNECT failed: {error}")))?;

    if response.status() != StatusCode::OK {
        return Err(failed(format!(
            "CONNECT tunnel failed, response {}",
            response.status().as_u16()
        )));
    }

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|error| failed(format!("proxy CONNECT failed: {error}")))?;
    trace!(%authority, "proxy tunnel established");
    Ok(TokioIo::new(upgraded))
}

/// An HTTP proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Proxy {
    host: Box<str>,
    port: u16,
}

impl Proxy {
    fn parse(proxy: &str) -> Result<Self, TransportFailure> {
        let uri: Uri = proxy.parse().map_err(|error| {
            TransportFailure::new(
                ReturnCode::CouldntResolveProxy,
                format!("Unsupported proxy syntax in '{proxy}': {error}"),
            )
        })?;

        if uri.scheme() != Some(&Scheme::HTTP) {
            return Err(TransportFailure::new(
                ReturnCode::UnsupportedProtocol,
                format!("Unsupported proxy scheme for '{proxy}'"),
            ));
        }

        let (host, port) = tcp::get_host_and_port(&uri)?;
        Ok(Self { host, port })
    }
}

fn proxy_authorization(options: &EngineOptions) -> Result<Option<HeaderValue>, TransportFailure> {
    let Some(userpwd) = options.proxy_userpwd.as_deref() else {
        return Ok(None);
    };

    let mut value = HeaderValue::from_str(&format!("Basic {}", BASE64_STANDARD.encode(userpwd)))
        .map_err(|_| {
            TransportFailure::new(
                ReturnCode::CouldntConnect,
                "proxy credentials are not a valid header value",
            )
        })?;
    value.set_sensitive(true);
    Ok(Some(value))
}

/// Render the response head as raw header bytes.
///
/// Values are copied as received, so non-UTF-8 (obs-text) bytes survive.
fn header_blob(version: Version, status: StatusCode, reason: &[u8], headers: &HeaderMap) -> Bytes {
    let mut blob = BytesMut::with_capacity(64 + headers.len() * 32);
    blob.extend_from_slice(format!("{:?} {}", version, status.as_u16()).as_bytes());
    if !reason.is_empty() {
        blob.put_u8(b' ');
        blob.extend_from_slice(reason);
    }
    blob.extend_from_slice(b"\r\n");
    for (name, value) in headers {
        blob.extend_from_slice(name.as_str().as_bytes());
        blob.extend_from_slice(b": ");
        blob.extend_from_slice(value.as_bytes());
        blob.extend_from_slice(b"\r\n");
    }
    blob.extend_from_slice(b"\r\n");
    blob.freeze()
}

/// Convert the URI to origin-form, if it is not already.
///
/// This form of the URI has no scheme or authority, and contains just
/// the path, usually used in HTTP/1 requests.
fn origin_form(uri: &Uri) -> Uri {
    match uri.path_and_query() {
        Some(path) if path.as_str() != "/" => {
            let mut parts = ::http::uri::Parts::default();
            parts.path_and_query = Some(path.clone());
            Uri::from_parts(parts).expect("path is valid uri")
        }
        _none_or_just_slash => {
            debug_assert!(Uri::default() == "/");
            Uri::default()
        }
    }
}

/// Returns the port if it is not the default port for the scheme.
fn get_non_default_port(uri: &Uri) -> Option<Port<&str>> {
    match (uri.port().map(|p| p.as_u16()), is_schema_secure(uri)) {
        (Some(443), true) => None,
        (Some(80), false) => None,
        _ => uri.port(),
    }
}

/// Returns true if the URI scheme is presumed secure.
fn is_schema_secure(uri: &Uri) -> bool {
    uri.scheme_str()
        .map(|scheme_str| matches!(scheme_str, "wss" | "https"))
        .unwrap_or_default()
}

/// Set the Host header if it is not already set, using the authority from the URI.
fn set_host_header(headers: &mut HeaderMap, uri: &Uri) {
    let Some(hostname) = uri.host() else {
        return;
    };

    if headers.contains_key(HOST) {
        return;
    }

    let value = match get_non_default_port(uri) {
        Some(port) => HeaderValue::from_str(&format!("{hostname}:{port}")),
        None => HeaderValue::from_str(hostname),
    };

    if let Ok(value) = value {
        headers.insert(HOST, value);
    }
}
