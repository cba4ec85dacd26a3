//! Per-request option descriptors.
//!
//! These are the options a pipeline attaches to a request environment. They describe
//! intent ("verify the peer", "use this proxy"); the request translator maps them onto
//! the engine-native [`EngineOptions`](crate::engine::EngineOptions).

use std::fmt;

use camino::Utf8PathBuf;
use http::Uri;

/// Options for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Total time allowed for the request, in seconds.
    pub timeout: Option<f64>,

    /// Time allowed to open the connection, in seconds.
    pub open_timeout: Option<f64>,

    /// Proxy to send the request through.
    pub proxy: Option<ProxyOptions>,

    /// Local address to bind the outgoing connection to.
    pub bind: Option<BindOptions>,

    /// TLS configuration for `https` requests.
    pub tls: Option<TlsOptions>,
}

impl RequestOptions {
    /// Set the total request timeout, in seconds.
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Set the connection timeout, in seconds.
    pub fn with_open_timeout(mut self, seconds: f64) -> Self {
        self.open_timeout = Some(seconds);
        self
    }

    /// Send the request through a proxy.
    pub fn with_proxy(mut self, proxy: ProxyOptions) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Bind the outgoing connection to a local address.
    pub fn with_bind(mut self, bind: BindOptions) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Use the provided TLS configuration.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// TLS protocol versions which can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,

    /// TLS 1.3
    Tls13,
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls12 => f.write_str("TLSv1.2"),
            TlsVersion::Tls13 => f.write_str("TLSv1.3"),
        }
    }
}

/// TLS configuration for a request.
///
/// Fields left as `None` fall back to the transport engine's defaults.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the peer certificate chain and hostname.
    pub verify: bool,

    /// The TLS protocol version to use.
    pub version: Option<TlsVersion>,

    /// Path to a PEM encoded client certificate.
    pub client_cert: Option<Utf8PathBuf>,

    /// Path to a PEM encoded client private key.
    pub client_key: Option<Utf8PathBuf>,

    /// Password for the client private key.
    pub client_cert_password: Option<String>,

    /// Older name for [`TlsOptions::client_cert_password`], used only when that is unset.
    pub client_cert_passwd: Option<String>,

    /// Path to a PEM file of trusted certificate authorities.
    pub ca_file: Option<Utf8PathBuf>,

    /// Path to a directory of PEM encoded trusted certificate authorities.
    pub ca_path: Option<Utf8PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify: true,
            version: None,
            client_cert: None,
            client_key: None,
            client_cert_password: None,
            client_cert_passwd: None,
            ca_file: None,
            ca_path: None,
        }
    }
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("verify", &self.verify)
            .field("version", &self.version)
            .field("client_cert", &self.client_cert)
            .field("client_key", &self.client_key)
            .field("password", &self.password().map(|_| "<redacted>"))
            .field("ca_file", &self.ca_file)
            .field("ca_path", &self.ca_path)
            .finish()
    }
}

impl TlsOptions {
    /// TLS options which skip all peer verification.
    pub fn insecure() -> Self {
        Self {
            verify: false,
            ..Default::default()
        }
    }

    /// The client key password, preferring [`TlsOptions::client_cert_password`].
    pub fn password(&self) -> Option<&str> {
        self.client_cert_password
            .as_deref()
            .or(self.client_cert_passwd.as_deref())
    }
}

/// A proxy to route requests through.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    /// The proxy URI. Only the scheme, host and port are used.
    pub uri: Uri,

    /// User for proxy authentication.
    pub user: Option<String>,

    /// Password for proxy authentication.
    pub password: Option<String>,
}

impl fmt::Debug for ProxyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyOptions")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ProxyOptions {
    /// A proxy without credentials.
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            user: None,
            password: None,
        }
    }

    /// Authenticate with the proxy.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

/// Local address to bind outgoing connections to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindOptions {
    /// Local interface or IP address.
    pub host: Option<String>,

    /// Local port. Transport engines pick an ephemeral port; this is informational.
    pub port: Option<u16>,
}

impl BindOptions {
    /// Bind to the given local host.
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_defaults_verify() {
        let tls = TlsOptions::default();
        assert!(tls.verify);
        assert!(!TlsOptions::insecure().verify);
    }

    #[test]
    fn tls_password_priority() {
        let mut tls = TlsOptions {
            client_cert_passwd: Some("legacy".into()),
            ..Default::default()
        };
        assert_eq!(tls.password(), Some("legacy"));

        tls.client_cert_password = Some("primary".into());
        assert_eq!(tls.password(), Some("primary"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let tls = TlsOptions {
            client_cert_password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{tls:?}").contains("hunter2"));

        let proxy = ProxyOptions::new("http://proxy:3128".parse().unwrap())
            .with_credentials("user", "hunter2");
        assert!(!format!("{proxy:?}").contains("hunter2"));
    }
}
