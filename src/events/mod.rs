//! Event types emitted by the connection.

use crate::error::{DataError, HandshakeError, ProtocolError};
use crate::frame::JsonObject;
use std::fmt;

/// Externally visible connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Stream URL requested or transport opening; handshake not yet validated.
    Connecting,
    /// Handshake validated; frames are being decoded.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Events emitted by [BackendConnection](crate::BackendConnection) to registered handlers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Connection state transition.
    StateChanged(ConnectionState),

    /// One completed text message, parsed as a JSON object.
    Message(JsonObject),

    /// A completed message could not be parsed. The connection stays up.
    DataError(DataError),

    /// The server's upgrade response was rejected. The transport is being closed.
    HandshakeFailed(HandshakeError),

    /// The frame stream violated what this client speaks. The transport is being closed.
    ProtocolError(ProtocolError),

    /// The byte transport failed (resolve, refused, reset).
    TransportError { reason: String },
}

impl Event {
    /// State carried by a `StateChanged` event.
    pub fn state(&self) -> Option<ConnectionState> {
        match self {
            Self::StateChanged(s) => Some(*s),
            _ => None,
        }
    }

    /// Whether this event signals that the current connection is being torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed(_) | Self::ProtocolError(_) | Self::TransportError { .. }
        )
    }
}
