//! RFC 6455 base framing, server-to-client direction.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |      (16, if len == 126)      |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Payload Data continued ...                |
//! +---------------------------------------------------------------+
//! ```
//!
//! Only unmasked frames with 7-bit or 16-bit lengths are spoken. Text and
//! continuation are the only opcodes that complete a message.

mod decoder;

pub use decoder::{DecodePhase, Decoded, FrameDecoder, JsonObject};

use crate::error::ProtocolError;

pub(crate) const FIN_BIT: u8 = 0x80;
pub(crate) const OPCODE_BITS: u8 = 0x0F;
pub(crate) const MASK_BIT: u8 = 0x80;
pub(crate) const LEN_BITS: u8 = 0x7F;

/// Base length value announcing a 16-bit extended length.
pub(crate) const LEN_EXTENDED_16: u8 = 126;
/// Base length value announcing a 64-bit extended length (unsupported).
pub(crate) const LEN_EXTENDED_64: u8 = 127;

/// Largest payload a single frame can carry here.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    /// Binary, control and reserved opcodes: recognised on the wire, never accepted.
    Other(u8),
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Other(op) => op & OPCODE_BITS,
        }
    }
}

impl From<u8> for Opcode {
    fn from(b: u8) -> Self {
        match b & OPCODE_BITS {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            op => Self::Other(op),
        }
    }
}

/// Encode one unmasked frame, as a server would send it.
///
/// Used to synthesise server traffic (tests, local stream fakes). Payloads
/// above [`MAX_FRAME_PAYLOAD`] are refused.
pub fn encode_frame(fin: bool, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(if fin { FIN_BIT } else { 0 } | opcode.as_u8());
    match payload.len() {
        n if n < LEN_EXTENDED_16 as usize => out.push(n as u8),
        n if n <= MAX_FRAME_PAYLOAD => {
            out.push(LEN_EXTENDED_16);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        _ => return Err(ProtocolError::LargePayload),
    }
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode a complete message as a single final text frame.
pub fn encode_text(text: &str) -> Result<Vec<u8>, ProtocolError> {
    encode_frame(true, Opcode::Text, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_from_byte_ignores_high_bits() {
        assert_eq!(Opcode::from(0x81), Opcode::Text);
        assert_eq!(Opcode::from(0x80), Opcode::Continuation);
        assert_eq!(Opcode::from(0x02), Opcode::Other(0x2));
        assert_eq!(Opcode::from(0x89).as_u8(), 0x9);
    }

    #[test]
    fn short_frame_layout() {
        let f = encode_frame(true, Opcode::Text, b"{}").unwrap();
        assert_eq!(f, vec![0x81, 0x02, b'{', b'}']);
        let f = encode_frame(false, Opcode::Continuation, b"").unwrap();
        assert_eq!(f, vec![0x00, 0x00]);
    }

    #[test]
    fn extended_frame_layout() {
        let payload = vec![b'a'; 300];
        let f = encode_frame(true, Opcode::Text, &payload).unwrap();
        assert_eq!(&f[..4], &[0x81, 126, 0x01, 0x2C]);
        assert_eq!(f.len(), 4 + 300);
    }

    #[test]
    fn refuses_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        assert_eq!(
            encode_frame(true, Opcode::Text, &payload),
            Err(ProtocolError::LargePayload)
        );
    }
}
