//! Opening handshake (RFC 6455 section 4).
//!
//! The request is a plain HTTP/1.1 GET with an upgrade offer:
//!
//! ```text
//! GET /v1/stream?filter=... HTTP/1.1
//! Host: stream.example.com:8080
//! Upgrade: websocket
//! Connection: upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The server proves it understood the offer by echoing
//! `base64(sha1(key + GUID))` in `Sec-WebSocket-Accept`.

mod target;

pub use self::target::{StreamUrl, DEFAULT_STREAM_PORT};

use crate::error::HandshakeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::fmt;

/// GUID appended to the nonce before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header block terminator of the HTTP response.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Expected `Sec-WebSocket-Accept` value for one handshake attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptKey(String);

impl AcceptKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AcceptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the accept key the server must return for `nonce`.
pub fn compute_accept_key(nonce: &str) -> AcceptKey {
    let mut hasher = Sha1::new();
    hasher.update(nonce.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    AcceptKey(STANDARD.encode(hasher.finalize()))
}

/// Fresh base64 nonce from the 16 raw bytes of a v4 UUID.
pub fn generate_nonce() -> String {
    STANDARD.encode(uuid::Uuid::new_v4().as_bytes())
}

/// Request bytes for one handshake attempt, paired with the accept key that
/// validates the matching response.
#[derive(Clone, Debug)]
pub struct OpeningHandshake {
    request: Vec<u8>,
    nonce: String,
    accept_key: AcceptKey,
}

impl OpeningHandshake {
    /// Build the request with a newly generated nonce.
    pub fn new(url: &StreamUrl) -> Self {
        Self::with_nonce(url, generate_nonce())
    }

    /// Build the request for a given nonce.
    pub fn with_nonce(url: &StreamUrl, nonce: impl Into<String>) -> Self {
        let nonce = nonce.into();
        let request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            url.resource(),
            url.host_header(),
            nonce
        );
        let accept_key = compute_accept_key(&nonce);
        Self {
            request: request.into_bytes(),
            nonce,
            accept_key,
        }
    }

    pub fn request(&self) -> &[u8] {
        &self.request
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn accept_key(&self) -> &AcceptKey {
        &self.accept_key
    }

    /// Split into the bytes to send and the key to validate against.
    pub fn into_parts(self) -> (Vec<u8>, AcceptKey) {
        (self.request, self.accept_key)
    }
}

/// Offset one past the `\r\n\r\n` that ends the response headers, if present.
pub fn find_response_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Validate the server's upgrade response against the expected accept key.
///
/// Only the status line and the `Sec-WebSocket-Accept`, `Upgrade` and
/// `Connection` headers are inspected. Header names match case-insensitively;
/// the accept value must match byte for byte.
pub fn validate_response(response: &[u8], expected: &AcceptKey) -> Result<(), HandshakeError> {
    let text = String::from_utf8_lossy(response);
    let mut lines = text.split("\r\n");

    let status = lines
        .next()
        .and_then(parse_status)
        .ok_or(HandshakeError::MissingStatus)?;
    if status != 101 {
        return Err(HandshakeError::BadStatus(status));
    }

    let mut accept = None;
    let mut upgrade = None;
    let mut connection = None;
    for line in lines.take_while(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("sec-websocket-accept") {
            accept.get_or_insert_with(|| value.to_string());
        } else if name.eq_ignore_ascii_case("upgrade") {
            upgrade.get_or_insert_with(|| value.to_string());
        } else if name.eq_ignore_ascii_case("connection") {
            connection.get_or_insert_with(|| value.to_string());
        }
    }

    if accept.as_deref() != Some(expected.as_str()) {
        return Err(HandshakeError::AcceptMismatch {
            expected: expected.to_string(),
            actual: accept,
        });
    }
    if !upgrade
        .as_deref()
        .is_some_and(|v| v.to_ascii_lowercase() == "websocket")
    {
        return Err(HandshakeError::BadUpgrade(upgrade));
    }
    if !connection
        .as_deref()
        .is_some_and(|v| v.to_ascii_lowercase() == "upgrade")
    {
        return Err(HandshakeError::BadConnection(connection));
    }
    Ok(())
}

/// `HTTP/1.1 NNN <reason>` -> `NNN`.
fn parse_status(line: &str) -> Option<u16> {
    let rest = line.strip_prefix("HTTP/1.1 ")?;
    let code = rest.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !rest[3..].starts_with(char::is_whitespace) {
        return None;
    }
    code.parse().ok()
}
