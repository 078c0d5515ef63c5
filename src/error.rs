use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the stream connection.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("data: {0}")]
    Data(#[from] DataError),

    #[error("invalid stream url: {0}")]
    InvalidUrl(String),

    #[error("stream url request: {0}")]
    StreamUrl(String),

    #[error("not connected")]
    NotConnected,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error tears down the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

/// Opening handshake failures. Always fatal to the connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("response has no HTTP/1.1 status line")]
    MissingStatus,

    #[error("unexpected status code {0}, expected 101")]
    BadStatus(u16),

    #[error("Sec-WebSocket-Accept mismatch (expected {expected}, got {actual:?})")]
    AcceptMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("bad Upgrade header {0:?}")]
    BadUpgrade(Option<String>),

    #[error("bad Connection header {0:?}")]
    BadConnection(Option<String>),

    #[error("response exceeds {0} bytes without header terminator")]
    ResponseTooLarge(usize),

    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),
}

/// Framing violations. Fatal: the transport is closed and buffered state dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("masked payload not supported")]
    MaskedPayload,

    #[error("large payload not supported")]
    LargePayload,

    #[error("opcode {0:#x} not supported")]
    UnsupportedOpcode(u8),
}

/// A completed text message that is not a JSON object. Reported per message;
/// the connection stays up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is JSON but not an object")]
    NotAnObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_errors_are_not_fatal() {
        assert!(!Error::from(DataError::NotAnObject).is_fatal());
        assert!(Error::from(ProtocolError::MaskedPayload).is_fatal());
        assert!(Error::from(HandshakeError::BadStatus(404)).is_fatal());
    }

    #[test]
    fn protocol_error_messages() {
        assert_eq!(
            Error::from(ProtocolError::UnsupportedOpcode(0x2)).to_string(),
            "protocol: opcode 0x2 not supported"
        );
        assert_eq!(
            ProtocolError::LargePayload.to_string(),
            "large payload not supported"
        );
    }
}
