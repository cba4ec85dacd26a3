//! TCP connections for the hyper engine.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use http::Uri;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn, Instrument};

use super::ReturnCode;
use crate::TransportFailure;

/// Socket options for a single connection.
#[derive(Debug, Clone)]
pub(super) struct TcpOptions {
    /// Local address to bind before connecting.
    pub(super) interface: Option<IpAddr>,

    /// TCP keep-alive idle time.
    pub(super) keep_alive: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub(super) nodelay: bool,
}

/// Parse an interface option into a local IP address.
pub(super) fn parse_interface(interface: &str) -> Result<IpAddr, TransportFailure> {
    interface
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|_| {
            TransportFailure::new(
                ReturnCode::InterfaceFailed,
                format!("Couldn't bind to '{interface}'"),
            )
        })
}

pub(super) fn get_host_and_port(uri: &Uri) -> Result<(Box<str>, u16), TransportFailure> {
    let host = uri.host().ok_or_else(|| {
        TransportFailure::new(ReturnCode::UrlMalformat, format!("No host part in the URL {uri}"))
    })?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = match uri.port_u16() {
        Some(port) => port,
        None => match uri.scheme_str() {
            Some("http") => 80,
            Some("https") => 443,
            Some(scheme) => {
                return Err(TransportFailure::new(
                    ReturnCode::UnsupportedProtocol,
                    format!("Protocol \"{scheme}\" not supported"),
                ))
            }
            None => {
                return Err(TransportFailure::new(
                    ReturnCode::UrlMalformat,
                    format!("No scheme in the URL {uri}"),
                ))
            }
        },
    };

    Ok((host.into(), port))
}

/// Resolve `host` and connect to the first address which accepts the connection.
///
/// `unresolved` is the return code to report when resolution fails, which differs
/// between target hosts and proxies.
pub(super) async fn connect(
    host: &str,
    port: u16,
    options: &TcpOptions,
    unresolved: ReturnCode,
) -> Result<TcpStream, TransportFailure> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|error| {
            trace!(%host, %error, "dns resolution failed");
            TransportFailure::new(unresolved, format!("Could not resolve host: {host}"))
        })?
        .collect();

    if addrs.is_empty() {
        return Err(TransportFailure::new(
            unresolved,
            format!("Could not resolve host: {host}"),
        ));
    }

    let mut failure = None;
    for addr in addrs {
        let span = tracing::trace_span!("tcp", remote.addr = %addr);
        match connect_addr(addr, options).instrument(span).await {
            Ok(stream) => {
                trace!(remote.addr = %addr, "tcp connected");
                return Ok(stream);
            }
            Err(error) => {
                trace!(remote.addr = %addr, %error, "tcp connect attempt failed");
                failure = Some(error);
            }
        }
    }

    Err(failure.expect("at least one address was attempted"))
}

async fn connect_addr(addr: SocketAddr, options: &TcpOptions) -> Result<TcpStream, TransportFailure> {
    let socket = open_socket(&addr, options)?;
    let stream = socket.connect(addr).await.map_err(|error| {
        TransportFailure::new(
            ReturnCode::CouldntConnect,
            format!("Failed to connect to {} port {}: {}", addr.ip(), addr.port(), error),
        )
    })?;

    if options.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", e);
        }
    }

    Ok(stream)
}

fn bind_local_address(socket: &socket2::Socket, dst_addr: &SocketAddr, local: IpAddr) -> io::Result<()> {
    match (dst_addr, local) {
        (SocketAddr::V4(_), IpAddr::V4(_)) | (SocketAddr::V6(_), IpAddr::V6(_)) => {
            socket.bind(&SocketAddr::new(local, 0).into())
        }
        _ => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "local address family does not match the remote address",
        )),
    }
}

fn open_socket(addr: &SocketAddr, options: &TcpOptions) -> Result<TcpSocket, TransportFailure> {
    use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};

    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(|error| {
        TransportFailure::new(ReturnCode::CouldntConnect, format!("tcp open error: {error}"))
    })?;
    trace!("tcp socket opened");

    let guard = tracing::trace_span!("socket_options").entered();

    // When constructing a Tokio `TcpSocket` from a raw fd/socket, the user is
    // responsible for ensuring O_NONBLOCK is set.
    socket.set_nonblocking(true).map_err(|error| {
        TransportFailure::new(
            ReturnCode::CouldntConnect,
            format!("tcp set_nonblocking error: {error}"),
        )
    })?;

    if let Some(dur) = options.keep_alive {
        let conf = TcpKeepalive::new().with_time(dur);
        if let Err(e) = socket.set_tcp_keepalive(&conf) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }

    if let Some(local) = options.interface {
        bind_local_address(&socket, addr, local).map_err(|error| {
            TransportFailure::new(
                ReturnCode::InterfaceFailed,
                format!("Couldn't bind to '{local}': {error}"),
            )
        })?;
        trace!(local.addr = %local, "tcp socket bound");
    }

    drop(guard);

    #[allow(unsafe_code)]
    let socket = unsafe {
        // Safety: `from_raw_fd` is only safe to call if ownership of the raw
        // file descriptor is transferred. Since we call `into_raw_fd` on the
        // socket2 socket, it gives up ownership of the fd and will not close
        // it, so this is safe.
        use std::os::unix::io::{FromRawFd, IntoRawFd};
        TcpSocket::from_raw_fd(socket.into_raw_fd())
    };

    Ok(socket)
}
