//! Translation of a request environment into an engine request.

use crate::engine::{EngineOptions, EngineRequest, ProxyAuth, VerifyHost};
use crate::env::Env;
use crate::options::{BindOptions, ProxyOptions, RequestOptions, TlsOptions};
use crate::Error;

use super::complete;
use super::Mode;

/// Build the engine request for `env`.
///
/// A stream body is read here, once, and the environment keeps the resulting bytes.
/// Options mapped from the environment win over `defaults`. The completion handler for
/// `mode` is attached to the returned request.
pub(super) async fn request(
    env: &mut Env,
    defaults: &EngineOptions,
    mode: Mode,
) -> Result<EngineRequest, Error> {
    let body = env.body_mut().materialize().await.map_err(Error::Body)?;

    let mut request = EngineRequest::new(
        env.method().clone(),
        env.uri().to_string(),
        env.headers().clone(),
        body,
    );

    let options = request.options_mut();
    map_options(options, env.options());
    options.merge_defaults(defaults);

    request.on_finish(complete::handler(env.completion().clone(), mode));
    Ok(request)
}

/// Map request options onto engine options.
pub(crate) fn map_options(options: &mut EngineOptions, request: &RequestOptions) {
    if let Some(tls) = &request.tls {
        map_tls(options, tls);
    }

    if let Some(proxy) = &request.proxy {
        map_proxy(options, proxy);
    }

    if let Some(timeout) = request.timeout {
        options.timeout_ms = Some(millis(timeout));
    }

    if let Some(open_timeout) = request.open_timeout {
        options.connect_timeout_ms = Some(millis(open_timeout));
    }

    if let Some(bind) = &request.bind {
        map_bind(options, bind);
    }
}

fn map_tls(options: &mut EngineOptions, tls: &TlsOptions) {
    options.ssl_verify_peer = Some(tls.verify);
    options.ssl_verify_host = Some(if tls.verify {
        VerifyHost::Strict
    } else {
        VerifyHost::Off
    });

    if let Some(version) = tls.version {
        options.ssl_version = Some(version);
    }
    if let Some(cert) = &tls.client_cert {
        options.ssl_cert = Some(cert.clone());
    }
    if let Some(key) = &tls.client_key {
        options.ssl_key = Some(key.clone());
    }
    if let Some(ca_file) = &tls.ca_file {
        options.ca_info = Some(ca_file.clone());
    }
    if let Some(ca_path) = &tls.ca_path {
        options.ca_path = Some(ca_path.clone());
    }
    if let Some(password) = tls.password() {
        options.key_password = Some(password.to_owned());
    }
}

fn map_proxy(options: &mut EngineOptions, proxy: &ProxyOptions) {
    let scheme = proxy.uri.scheme_str().unwrap_or("http");
    let host = proxy.uri.host().unwrap_or_default();
    let port = proxy.uri.port_u16().unwrap_or_else(|| default_proxy_port(scheme));
    options.proxy = Some(format!("{scheme}://{host}:{port}"));

    if let (Some(user), Some(password)) = (&proxy.user, &proxy.password) {
        options.proxy_auth = Some(ProxyAuth::Any);
        options.proxy_userpwd = Some(format!("{user}:{password}"));
    }
}

fn default_proxy_port(scheme: &str) -> u16 {
    match scheme {
        "https" => 443,
        s if s.starts_with("socks") => 1080,
        _ => 80,
    }
}

fn map_bind(options: &mut EngineOptions, bind: &BindOptions) {
    if let Some(host) = &bind.host {
        options.interface = Some(host.clone());
    }
}

/// Convert fractional seconds to whole milliseconds, truncating toward zero.
///
/// Negative and NaN values become `0`; values too large for `u64` saturate. Engines
/// read `0` as "no timeout", so a sub-millisecond timeout disables the limit.
fn millis(seconds: f64) -> u64 {
    (seconds * 1000.0) as u64
}
