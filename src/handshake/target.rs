//! Stream URL: where the opening handshake goes.

use crate::error::Error;
use crate::Result;
use std::fmt;

/// Port used when the stream URL does not name one. The backend serves its
/// notification stream on 8080, not on the scheme default.
pub const DEFAULT_STREAM_PORT: u16 = 8080;

/// Host, port, path and query of a stream endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamUrl {
    /// Host as it appears in the `Host` header (IPv6 literals keep their brackets).
    pub host: String,
    pub port: u16,
    /// Percent-encoded path, `/` when empty.
    pub path: String,
    /// Percent-encoded query without the leading `?`.
    pub query: Option<String>,
}

impl StreamUrl {
    /// Parse a stream URL, falling back to [`DEFAULT_STREAM_PORT`].
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with_default_port(input, DEFAULT_STREAM_PORT)
    }

    /// Parse a stream URL with a caller-chosen fallback port.
    ///
    /// Accepts `ws`, `wss`, `http` and `https` schemes. The scheme only
    /// matters for validation; the connection is always plain TCP.
    pub fn parse_with_default_port(input: &str, default_port: u16) -> Result<Self> {
        let url = ::url::Url::parse(input).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" | "http" | "https" => {}
            other => {
                return Err(Error::InvalidUrl(format!("unsupported scheme {}", other)));
            }
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidUrl(format!("{} has no host", input)))?
            .to_string();
        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        Ok(Self {
            host,
            port: url.port().unwrap_or(default_port),
            path,
            query: url.query().map(str::to_string),
        })
    }

    /// Value of the `Host` header: always `host:port`.
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request target for the GET line.
    pub fn resource(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Host suitable for a socket connect (IPv6 brackets stripped).
    pub fn socket_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for StreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host_header(), self.resource())
    }
}

impl std::str::FromStr for StreamUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_8080() {
        let u = StreamUrl::parse("ws://stream.example.com/v1/stream?token=abc").unwrap();
        assert_eq!(u.host, "stream.example.com");
        assert_eq!(u.port, 8080);
        assert_eq!(u.path, "/v1/stream");
        assert_eq!(u.query.as_deref(), Some("token=abc"));
        assert_eq!(u.host_header(), "stream.example.com:8080");
        assert_eq!(u.resource(), "/v1/stream?token=abc");
    }

    #[test]
    fn explicit_port_wins() {
        let u: StreamUrl = "http://10.0.0.1:9000/s".parse().unwrap();
        assert_eq!(u.port, 9000);
        assert_eq!(u.query, None);
        assert_eq!(u.resource(), "/s");
    }

    #[test]
    fn empty_path_becomes_root() {
        let u = StreamUrl::parse("ws://h:1234").unwrap();
        assert_eq!(u.path, "/");
    }

    #[test]
    fn ipv6_host() {
        let u = StreamUrl::parse("ws://[::1]:7000/x").unwrap();
        assert_eq!(u.host_header(), "[::1]:7000");
        assert_eq!(u.socket_host(), "::1");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            StreamUrl::parse("not a url"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            StreamUrl::parse("ftp://host/file"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn custom_default_port() {
        let u = StreamUrl::parse_with_default_port("wss://h/p", 4433).unwrap();
        assert_eq!(u.port, 4433);
    }
}
