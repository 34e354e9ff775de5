//! Proxy endpoint representation.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Protocol spoken by a proxy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP proxy.
    Http,
    /// HTTP proxy reached over TLS.
    Https,
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS5 proxy.
    Socks5,
}

impl Scheme {
    /// The URL scheme string for this protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Socks4 => "socks4",
            Scheme::Socks5 => "socks5",
        }
    }

    /// Parse a protocol name as it appears in provider listings.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "socks4" | "socks4a" => Some(Scheme::Socks4),
            "socks5" | "socks5h" | "socks" => Some(Scheme::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a usable proxy endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid proxy endpoint {0:?}")]
pub struct InvalidEndpoint(pub String);

/// Address of a proxy server through which a request can be relayed.
///
/// Two endpoints are equal exactly when their `scheme://host:port` forms are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint. The host is lowercased so that string identity holds.
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into().trim().to_ascii_lowercase(),
            port,
        }
    }

    /// Parse `host:port`, falling back to `default_scheme` when no
    /// `scheme://` prefix is present.
    pub fn parse_with_default(input: &str, default_scheme: Scheme) -> Result<Self, InvalidEndpoint> {
        let input = input.trim();
        if input.contains("://") {
            return input.parse();
        }
        format!("{}://{}", default_scheme, input).parse()
    }

    /// Protocol the provider listed the proxy under.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Lowercased host name or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the proxy listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Convert the endpoint to a reqwest::Proxy covering all target schemes.
    ///
    /// `Https` marks a plain HTTP proxy that tunnels TLS via CONNECT, so it is
    /// dialed as `http://`.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(self.proxy_url())
    }

    /// URL reqwest dials to reach the proxy itself.
    fn proxy_url(&self) -> String {
        let dial = match self.scheme {
            Scheme::Https => Scheme::Http,
            other => other,
        };
        format!("{}://{}:{}", dial, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidEndpoint(s.to_string());
        let url = Url::parse(s.trim()).map_err(|_| invalid())?;
        let scheme = Scheme::from_name(url.scheme()).ok_or_else(invalid)?;
        if url.path() != "/" && !url.path().is_empty() {
            return Err(invalid());
        }
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        // url drops ports equal to the scheme default, so fall back to it explicitly
        let port = url.port_or_known_default().ok_or_else(invalid)?;
        Ok(Endpoint::new(scheme, host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
