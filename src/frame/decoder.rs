//! Incremental frame decoder.
//!
//! Bytes may arrive split anywhere, including inside a header. Unconsumed
//! bytes stay in the input buffer until the current phase can make progress.

use super::{
    Opcode, FIN_BIT, LEN_BITS, LEN_EXTENDED_16, LEN_EXTENDED_64, MASK_BIT, OPCODE_BITS,
};
use crate::error::{DataError, ProtocolError};
use bytes::{Buf, BytesMut};

/// Decoded JSON message body.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// What the decoder is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodePhase {
    /// The 2-byte base header of the next frame.
    Header,
    /// The 2-byte big-endian length following a base length of 126.
    ExtendedLength,
    /// The payload of the current frame.
    Payload,
}

/// One completed message.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Message(JsonObject),
    /// The message completed but its bytes are not a JSON object.
    DataError(DataError),
}

enum Step {
    Suspend,
    Continue,
    Emit(Decoded),
}

/// Streaming state machine turning frames into reassembled messages.
#[derive(Debug)]
pub struct FrameDecoder {
    phase: DecodePhase,
    input: BytesMut,
    fin: bool,
    masked: bool,
    opcode: Opcode,
    /// Opcode of the frame that started the current message.
    message_opcode: Option<Opcode>,
    payload_len: usize,
    message: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            phase: DecodePhase::Header,
            input: BytesMut::new(),
            fin: false,
            masked: false,
            opcode: Opcode::Continuation,
            message_opcode: None,
            payload_len: 0,
            message: BytesMut::new(),
        }
    }

    /// Drop all buffered bytes and partial frame/message state.
    pub fn reset(&mut self) {
        self.phase = DecodePhase::Header;
        self.input.clear();
        self.fin = false;
        self.masked = false;
        self.opcode = Opcode::Continuation;
        self.message_opcode = None;
        self.payload_len = 0;
        self.message.clear();
    }

    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    /// Bytes received but not yet consumed into a header or payload.
    pub fn buffered_len(&self) -> usize {
        self.input.len()
    }

    /// Bytes of the current message reassembled so far.
    pub fn partial_message_len(&self) -> usize {
        self.message.len()
    }

    /// Between messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.phase == DecodePhase::Header
            && self.input.is_empty()
            && self.message.is_empty()
            && self.message_opcode.is_none()
            && self.payload_len == 0
    }

    /// Feed a chunk and collect completed messages.
    ///
    /// On a protocol error the decoder is reset and the error returned;
    /// messages completed earlier in the same chunk are discarded. Use
    /// [`feed`](Self::feed) to observe them.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Decoded>, ProtocolError> {
        let mut out = Vec::new();
        self.feed(chunk, |d| out.push(d))?;
        Ok(out)
    }

    /// Feed a chunk, handing each completed message to `on_decoded` in order.
    ///
    /// Runs until the buffered input cannot advance the current phase. A
    /// protocol error resets the decoder before it is returned.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_decoded: F) -> Result<(), ProtocolError>
    where
        F: FnMut(Decoded),
    {
        self.input.extend_from_slice(chunk);
        loop {
            match self.step() {
                Ok(Step::Suspend) => return Ok(()),
                Ok(Step::Continue) => {}
                Ok(Step::Emit(decoded)) => on_decoded(decoded),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
    }

    fn step(&mut self) -> Result<Step, ProtocolError> {
        match self.phase {
            DecodePhase::Header => self.read_header(),
            DecodePhase::ExtendedLength => self.read_extended_length(),
            DecodePhase::Payload => self.read_payload(),
        }
    }

    fn read_header(&mut self) -> Result<Step, ProtocolError> {
        if self.input.len() < 2 {
            return Ok(Step::Suspend);
        }
        let b0 = self.input.get_u8();
        let b1 = self.input.get_u8();

        self.fin = b0 & FIN_BIT != 0;
        self.opcode = Opcode::from(b0 & OPCODE_BITS);
        self.masked = b1 & MASK_BIT != 0;
        if self.message_opcode.is_none() {
            self.message_opcode = Some(self.opcode);
        }

        if self.masked {
            return Err(ProtocolError::MaskedPayload);
        }
        match b1 & LEN_BITS {
            LEN_EXTENDED_64 => Err(ProtocolError::LargePayload),
            LEN_EXTENDED_16 => {
                self.phase = DecodePhase::ExtendedLength;
                Ok(Step::Continue)
            }
            len => {
                self.payload_len = len as usize;
                self.phase = DecodePhase::Payload;
                Ok(Step::Continue)
            }
        }
    }

    fn read_extended_length(&mut self) -> Result<Step, ProtocolError> {
        if self.input.len() < 2 {
            return Ok(Step::Suspend);
        }
        self.payload_len = self.input.get_u16() as usize;
        self.phase = DecodePhase::Payload;
        Ok(Step::Continue)
    }

    fn read_payload(&mut self) -> Result<Step, ProtocolError> {
        if self.input.len() < self.payload_len {
            return Ok(Step::Suspend);
        }
        let payload = self.input.split_to(self.payload_len);
        self.message.extend_from_slice(&payload);
        self.payload_len = 0;
        self.phase = DecodePhase::Header;

        if !self.fin {
            return Ok(Step::Continue);
        }

        let data = self.message.split();
        match self.message_opcode.take() {
            Some(Opcode::Text) => Ok(Step::Emit(parse_message(&data))),
            Some(op) => Err(ProtocolError::UnsupportedOpcode(op.as_u8())),
            None => Err(ProtocolError::UnsupportedOpcode(self.opcode.as_u8())),
        }
    }
}

fn parse_message(data: &[u8]) -> Decoded {
    let text = match std::str::from_utf8(data) {
        Ok(t) => t,
        Err(_) => return Decoded::DataError(DataError::InvalidUtf8),
    };
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Decoded::Message(map),
        Ok(_) => Decoded::DataError(DataError::NotAnObject),
        Err(e) => Decoded::DataError(DataError::InvalidJson(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, encode_text};
    use serde_json::json;

    fn obj(v: serde_json::Value) -> JsonObject {
        match v {
            serde_json::Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn single_frame_message() {
        let mut d = FrameDecoder::new();
        let out = d.decode(&encode_text(r#"{"event":"create"}"#).unwrap()).unwrap();
        assert_eq!(out, vec![Decoded::Message(obj(json!({"event": "create"})))]);
        assert!(d.is_idle());
    }

    #[test]
    fn empty_chunk_is_noop() {
        let mut d = FrameDecoder::new();
        assert!(d.decode(&[]).unwrap().is_empty());
        assert!(d.is_idle());
        d.decode(&[0x81]).unwrap();
        assert!(d.decode(&[]).unwrap().is_empty());
        assert_eq!(d.buffered_len(), 1);
    }

    #[test]
    fn any_split_yields_one_message() {
        let body = r#"{"messageType":"EVENT","data":{"id":"42","title":"split me"}}"#;
        let frame = encode_text(body).unwrap();
        let expected = Decoded::Message(serde_json::from_str(body).unwrap());

        for a in 0..=frame.len() {
            for b in a..=frame.len() {
                let mut d = FrameDecoder::new();
                let mut out = Vec::new();
                out.extend(d.decode(&frame[..a]).unwrap());
                out.extend(d.decode(&frame[a..b]).unwrap());
                out.extend(d.decode(&frame[b..]).unwrap());
                assert_eq!(out, vec![expected.clone()], "split at {} / {}", a, b);
                assert!(d.is_idle());
            }
        }
    }

    #[test]
    fn byte_at_a_time() {
        let frame = encode_text(r#"{"k":[1,2,3]}"#).unwrap();
        let mut d = FrameDecoder::new();
        let mut out = Vec::new();
        for b in &frame {
            out.extend(d.decode(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(out, vec![Decoded::Message(obj(json!({"k": [1, 2, 3]})))]);
    }

    #[test]
    fn masked_frame_is_rejected() {
        let mut d = FrameDecoder::new();
        let frame = [0x81, 0x82, 1, 2, 3, 4, b'{' ^ 1, b'}' ^ 2];
        assert_eq!(d.decode(&frame), Err(ProtocolError::MaskedPayload));
        assert!(d.is_idle());
    }

    #[test]
    fn sixty_four_bit_length_is_rejected() {
        let mut d = FrameDecoder::new();
        let mut frame = vec![0x81, 127];
        frame.extend_from_slice(&70_000u64.to_be_bytes());
        assert_eq!(d.decode(&frame), Err(ProtocolError::LargePayload));
        assert!(d.is_idle());
    }

    #[test]
    fn extended_length_reconstructed() {
        for len in [126usize, 127, 255, 256, 1000, 4096, 65_535] {
            // Fill with a JSON string so the message still parses.
            let body = format!(r#"{{"s":"{}"}}"#, "x".repeat(len - 8));
            assert_eq!(body.len(), len);
            let frame = encode_text(&body).unwrap();
            assert_eq!(frame[1], 126);

            let mut d = FrameDecoder::new();
            assert!(d.decode(&frame[..4]).unwrap().is_empty());
            assert_eq!(d.phase(), DecodePhase::Payload);
            assert!(d.decode(&frame[4..frame.len() - 1]).unwrap().is_empty());
            assert_eq!(d.buffered_len(), len - 1);
            let out = d.decode(&frame[frame.len() - 1..]).unwrap();
            assert_eq!(out.len(), 1);
            assert_eq!(d.phase(), DecodePhase::Header);
            assert_eq!(d.buffered_len(), 0);
        }
    }

    #[test]
    fn extended_length_split_inside_length_field() {
        let body = format!(r#"{{"s":"{}"}}"#, "y".repeat(200));
        let frame = encode_text(&body).unwrap();
        let mut d = FrameDecoder::new();
        d.decode(&frame[..3]).unwrap();
        assert_eq!(d.phase(), DecodePhase::ExtendedLength);
        let out = d.decode(&frame[3..]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn fragmented_message_reassembles() {
        let mut stream = encode_frame(false, Opcode::Text, br#"{"a":"#).unwrap();
        stream.extend(encode_frame(false, Opcode::Continuation, b"1,").unwrap());
        stream.extend(encode_frame(true, Opcode::Continuation, br#""b":2}"#).unwrap());

        let mut d = FrameDecoder::new();
        let out = d.decode(&stream[..stream.len() - 3]).unwrap();
        assert!(out.is_empty());
        assert!(d.partial_message_len() > 0);
        let out = d.decode(&stream[stream.len() - 3..]).unwrap();
        assert_eq!(out, vec![Decoded::Message(obj(json!({"a": 1, "b": 2})))]);
        assert!(d.is_idle());
    }

    #[test]
    fn two_frame_text_then_continuation() {
        let mut stream = encode_frame(false, Opcode::Text, br#"{"x":"#).unwrap();
        stream.extend(encode_frame(true, Opcode::Continuation, b"true}").unwrap());
        let out = FrameDecoder::new().decode(&stream).unwrap();
        assert_eq!(out, vec![Decoded::Message(obj(json!({"x": true})))]);
    }

    #[test]
    fn several_messages_in_one_chunk() {
        let mut stream = encode_text(r#"{"n":1}"#).unwrap();
        stream.extend(encode_text(r#"{"n":2}"#).unwrap());
        stream.extend(&encode_text(r#"{"n":3}"#).unwrap()[..3]);
        let mut d = FrameDecoder::new();
        let out = d.decode(&stream).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(d.buffered_len(), 1);
    }

    #[test]
    fn unsupported_opcode_fails_on_completion() {
        let mut d = FrameDecoder::new();
        let frame = encode_frame(true, Opcode::Other(0x2), b"\x00\x01").unwrap();
        assert!(d.decode(&frame[..3]).unwrap().is_empty());
        assert_eq!(
            d.decode(&frame[3..]),
            Err(ProtocolError::UnsupportedOpcode(0x2))
        );
        assert!(d.is_idle());

        let ping = encode_frame(true, Opcode::Other(0x9), b"").unwrap();
        assert_eq!(d.decode(&ping), Err(ProtocolError::UnsupportedOpcode(0x9)));
    }

    #[test]
    fn stray_continuation_is_unsupported() {
        let frame = encode_frame(true, Opcode::Continuation, b"{}").unwrap();
        assert_eq!(
            FrameDecoder::new().decode(&frame),
            Err(ProtocolError::UnsupportedOpcode(0x0))
        );
    }

    #[test]
    fn message_opcode_comes_from_first_frame() {
        let mut stream = encode_frame(false, Opcode::Other(0x2), b"{").unwrap();
        stream.extend(encode_frame(true, Opcode::Continuation, b"}").unwrap());
        assert_eq!(
            FrameDecoder::new().decode(&stream),
            Err(ProtocolError::UnsupportedOpcode(0x2))
        );
    }

    #[test]
    fn invalid_payloads_are_data_errors() {
        let mut d = FrameDecoder::new();
        let out = d.decode(&encode_text("not json").unwrap()).unwrap();
        assert!(matches!(out[..], [Decoded::DataError(DataError::InvalidJson(_))]));

        let out = d.decode(&encode_text("[1,2]").unwrap()).unwrap();
        assert_eq!(out, vec![Decoded::DataError(DataError::NotAnObject)]);

        let frame = encode_frame(true, Opcode::Text, &[0xFF, 0xFE]).unwrap();
        let out = d.decode(&frame).unwrap();
        assert_eq!(out, vec![Decoded::DataError(DataError::InvalidUtf8)]);

        // The decoder keeps going after a data error.
        let out = d.decode(&encode_text("{}").unwrap()).unwrap();
        assert_eq!(out, vec![Decoded::Message(JsonObject::new())]);
    }

    #[test]
    fn clean_after_error() {
        let mut d = FrameDecoder::new();
        d.decode(&encode_frame(false, Opcode::Text, br#"{"stale":"#).unwrap())
            .unwrap();
        d.decode(&[0x81, 126, 0x01]).unwrap();
        assert!(!d.is_idle());
        d.reset();
        assert!(d.is_idle());

        d.decode(&encode_frame(false, Opcode::Text, br#"{"stale":"#).unwrap())
            .unwrap();
        assert_eq!(d.decode(&[0x81, 0xFF]), Err(ProtocolError::MaskedPayload));
        assert!(d.is_idle());
        let out = d.decode(&encode_text(r#"{"fresh":1}"#).unwrap()).unwrap();
        assert_eq!(out, vec![Decoded::Message(obj(json!({"fresh": 1})))]);
    }

    #[test]
    fn feed_reports_messages_before_error() {
        let mut stream = encode_text(r#"{"ok":1}"#).unwrap();
        stream.extend_from_slice(&[0x81, 0x80]);
        let mut seen = Vec::new();
        let res = FrameDecoder::new().feed(&stream, |d| seen.push(d));
        assert_eq!(res, Err(ProtocolError::MaskedPayload));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn empty_final_text_frame_is_data_error() {
        let frame = encode_frame(true, Opcode::Text, b"").unwrap();
        let out = FrameDecoder::new().decode(&frame).unwrap();
        assert!(matches!(out[..], [Decoded::DataError(DataError::InvalidJson(_))]));
    }
}
