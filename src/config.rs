//! Connection settings.

use crate::handshake::DEFAULT_STREAM_PORT;
use serde::Deserialize;
use std::time::Duration;

/// Default service endpoint queried for the stream URL.
pub const DEFAULT_SERVICE_URL: &str = "https://api.engin.io";

/// Settings for one [BackendConnection](crate::BackendConnection).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Port used when the stream URL has none.
    pub default_port: u16,
    /// Give up on a handshake response after this long. `None` waits forever.
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Option<Duration>,
    /// Upper bound on buffered handshake response bytes before the header terminator.
    pub max_handshake_len: usize,
    /// Disable Nagle on the TCP stream.
    pub nodelay: bool,
    /// Enable TCP keepalive probes on the stream socket.
    pub keepalive: bool,
    /// Base URL of the REST service that hands out stream URLs.
    pub service_url: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_STREAM_PORT,
            handshake_timeout: None,
            max_handshake_len: 16 * 1024,
            nodelay: true,
            keepalive: true,
            service_url: DEFAULT_SERVICE_URL.to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = url.into();
        self
    }
}

/// Optional durations as (fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
