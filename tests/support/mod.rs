#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serve `handler` over HTTP/1.1 on an ephemeral local port.
pub async fn serve<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(handler))
                    .await;
            });
        }
    });

    addr
}

/// Serve the standard test routes.
pub async fn serve_routes() -> SocketAddr {
    serve(routes).await
}

/// An address on which nothing is listening.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert("content-type", "text/plain".parse().unwrap());
    response
}

/// `/` says hello, `/missing` is a 404, `/slow` answers after two seconds,
/// `/delay` after 200ms, `/cookies` sets two cookies and `/echo` returns the request body.
pub async fn routes(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match request.uri().path() {
        "/" => {
            let mut response = text(StatusCode::OK, "hello");
            response
                .headers_mut()
                .insert("x-test", "yes".parse().unwrap());
            response
        }
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            text(StatusCode::OK, "finally")
        }
        "/delay" => {
            tokio::time::sleep(Duration::from_millis(200)).await;
            text(StatusCode::OK, "delayed")
        }
        "/cookies" => {
            let mut response = text(StatusCode::OK, "");
            let headers = response.headers_mut();
            headers.append("set-cookie", "a=1".parse().unwrap());
            headers.append("set-cookie", "b=2".parse().unwrap());
            response
        }
        "/echo" => {
            let method = request.method().to_string();
            let body = request
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            let mut response = Response::new(Full::new(body));
            response
                .headers_mut()
                .insert("x-method", method.parse().unwrap());
            response
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}
