//! Binary frame envelope with length-prefixed payloads
//!
//! Frame format (all integers big-endian):
//! ```text
//! +-------+---------+--------+----------+------------------+
//! | magic | version | opcode | length   | payload          |
//! | 2B    | 1B      | 1B     | 4B (u32) | (length bytes)   |
//! +-------+---------+--------+----------+------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RelayError, Result};

/// Protocol magic constant ("BP")
pub const MAGIC: [u8; 2] = [0x42, 0x50];

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Frame header size: 2 bytes magic + 1 byte version + 1 byte opcode + 4 bytes length
pub const FRAME_HEADER_SIZE: usize = 8;

/// Default maximum frame payload size (1 MB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Opcodes carried in the frame header
///
/// Values are wire-stable; new opcodes extend the table, existing values
/// never move.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Liveness and session setup (0x00 - 0x0F)
    Ping = 0x00,
    Pong = 0x01,
    Handshake = 0x02,
    HandshakeAck = 0x03,

    // Presence (0x10 - 0x1F)
    UserJoin = 0x10,
    UserLeave = 0x11,
    UsersOnline = 0x12,

    // Chat rooms (0x20 - 0x2F)
    ChatJoin = 0x20,
    ChatLeave = 0x21,
    ChatMessage = 0x22,
    ChatHistory = 0x23,
    TypingStart = 0x24,
    TypingStop = 0x25,

    // Voice rooms (0x30 - 0x3F)
    VoiceJoin = 0x30,
    VoiceLeave = 0x31,
    VoiceUsers = 0x32,

    // Direct messages (0x40 - 0x4F)
    DmSend = 0x40,
    DmReceive = 0x41,
    DmSent = 0x42,

    // WebRTC call signaling (0x50 - 0x5F)
    CallOffer = 0x50,
    CallAnswer = 0x51,
    IceCandidate = 0x52,
    CallEnded = 0x53,
    CallRejected = 0x54,
    CallFailed = 0x55,

    // Errors and shutdown
    Error = 0xFE,
    Close = 0xFF,
}

impl Opcode {
    /// Convert from u8, returns None for unknown opcodes
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::Ping),
            0x01 => Some(Opcode::Pong),
            0x02 => Some(Opcode::Handshake),
            0x03 => Some(Opcode::HandshakeAck),

            0x10 => Some(Opcode::UserJoin),
            0x11 => Some(Opcode::UserLeave),
            0x12 => Some(Opcode::UsersOnline),

            0x20 => Some(Opcode::ChatJoin),
            0x21 => Some(Opcode::ChatLeave),
            0x22 => Some(Opcode::ChatMessage),
            0x23 => Some(Opcode::ChatHistory),
            0x24 => Some(Opcode::TypingStart),
            0x25 => Some(Opcode::TypingStop),

            0x30 => Some(Opcode::VoiceJoin),
            0x31 => Some(Opcode::VoiceLeave),
            0x32 => Some(Opcode::VoiceUsers),

            0x40 => Some(Opcode::DmSend),
            0x41 => Some(Opcode::DmReceive),
            0x42 => Some(Opcode::DmSent),

            0x50 => Some(Opcode::CallOffer),
            0x51 => Some(Opcode::CallAnswer),
            0x52 => Some(Opcode::IceCandidate),
            0x53 => Some(Opcode::CallEnded),
            0x54 => Some(Opcode::CallRejected),
            0x55 => Some(Opcode::CallFailed),

            0xFE => Some(Opcode::Error),
            0xFF => Some(Opcode::Close),
            _ => None,
        }
    }
}

/// A single protocol frame
///
/// The opcode is kept as the raw byte: an unknown opcode is not a decode
/// error, it is dropped at dispatch (the protocol tolerates peers that are
/// one opcode-table revision ahead).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub opcode: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with the given opcode and payload
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode: opcode as u8,
            payload: payload.into(),
        }
    }

    /// Create an empty frame (no payload)
    pub fn empty(opcode: Opcode) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode: opcode as u8,
            payload: Bytes::new(),
        }
    }

    /// Resolve the raw opcode byte against the opcode table
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Get the total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode this frame into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        buf.put_slice(&MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.opcode);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Encode this frame into a new Bytes
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Try to decode a frame from a buffer.
    ///
    /// Returns `Ok(Some(frame))` once the full declared payload has
    /// accumulated, `Ok(None)` when more bytes are needed, and a
    /// `MalformedFrame` error on a magic mismatch or an impossible declared
    /// length. Unconsumed bytes stay in the buffer for the next pass.
    pub fn decode(buf: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        if buf[0] != MAGIC[0] || buf[1] != MAGIC[1] {
            return Err(RelayError::malformed_frame(format!(
                "invalid magic bytes 0x{:02X}{:02X}",
                buf[0], buf[1]
            )));
        }

        let version = buf[2];
        let opcode = buf[3];
        let payload_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        if payload_len > max_payload {
            return Err(RelayError::malformed_frame(format!(
                "declared payload of {} bytes exceeds limit of {}",
                payload_len, max_payload
            )));
        }

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Frame {
            version,
            opcode,
            payload,
        }))
    }
}

/// Streaming frame reassembler
///
/// Bytes arrive from the transport in arbitrary chunks; the codec
/// accumulates them and yields complete frames in arrival order.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: BytesMut,
    max_payload: usize,
}

impl FrameCodec {
    /// Create a codec with the default payload limit
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a codec with a specific payload limit
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_payload,
        }
    }

    /// Feed transport bytes into the accumulator
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete frame
    pub fn decode_next(&mut self) -> Result<Option<Frame>> {
        Frame::decode(&mut self.buffer, self.max_payload)
    }

    /// Bytes currently buffered awaiting a complete frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        let opcodes = [
            Opcode::Ping,
            Opcode::Handshake,
            Opcode::UserJoin,
            Opcode::ChatMessage,
            Opcode::TypingStart,
            Opcode::VoiceUsers,
            Opcode::DmSend,
            Opcode::CallOffer,
            Opcode::IceCandidate,
            Opcode::CallFailed,
            Opcode::Error,
            Opcode::Close,
        ];

        for opcode in opcodes {
            let byte = opcode as u8;
            let recovered = Opcode::from_u8(byte).unwrap();
            assert_eq!(opcode, recovered);
        }
    }

    #[test]
    fn test_opcode_values_are_wire_stable() {
        assert_eq!(Opcode::Ping as u8, 0x00);
        assert_eq!(Opcode::UsersOnline as u8, 0x12);
        assert_eq!(Opcode::ChatMessage as u8, 0x22);
        assert_eq!(Opcode::VoiceJoin as u8, 0x30);
        assert_eq!(Opcode::DmSent as u8, 0x42);
        assert_eq!(Opcode::CallFailed as u8, 0x55);
        assert_eq!(Opcode::Error as u8, 0xFE);
        assert_eq!(Opcode::Close as u8, 0xFF);
    }

    #[test]
    fn test_frame_encode_layout() {
        let frame = Frame::new(Opcode::ChatJoin, &b"abc"[..]);
        let encoded = frame.encode_to_bytes();

        assert_eq!(&encoded[0..2], &MAGIC);
        assert_eq!(encoded[2], PROTOCOL_VERSION);
        assert_eq!(encoded[3], Opcode::ChatJoin as u8);
        assert_eq!(&encoded[4..8], &3u32.to_be_bytes());
        assert_eq!(&encoded[8..], b"abc");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = Frame::new(Opcode::ChatMessage, vec![1, 2, 3, 4, 5]);
        let mut buf = BytesMut::from(&original.encode_to_bytes()[..]);

        let decoded = Frame::decode(&mut buf, DEFAULT_MAX_PAYLOAD_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(original, decoded);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_streaming_split_at_every_boundary() {
        let frame = Frame::new(Opcode::DmSend, &b"split me anywhere"[..]);
        let encoded = frame.encode_to_bytes();

        for split in 1..encoded.len() {
            let mut codec = FrameCodec::new();
            codec.feed(&encoded[..split]);
            assert!(
                codec.decode_next().unwrap().is_none(),
                "partial frame decoded at split {}",
                split
            );

            codec.feed(&encoded[split..]);
            let decoded = codec.decode_next().unwrap().unwrap();
            assert_eq!(frame, decoded);
            assert!(codec.decode_next().unwrap().is_none());
        }
    }

    #[test]
    fn test_back_to_back_frames_with_remainder() {
        let first = Frame::new(Opcode::Ping, vec![9u8; 10]);
        let second = Frame::new(Opcode::Pong, vec![7u8; 10]);

        let mut data = BytesMut::new();
        first.encode(&mut data);
        second.encode(&mut data);

        let mut codec = FrameCodec::new();
        // Everything except the last byte of the second frame.
        codec.feed(&data[..data.len() - 1]);

        assert_eq!(codec.decode_next().unwrap().unwrap(), first);
        assert!(codec.decode_next().unwrap().is_none());
        assert_eq!(codec.buffered_len(), second.encoded_size() - 1);

        codec.feed(&data[data.len() - 1..]);
        assert_eq!(codec.decode_next().unwrap().unwrap(), second);
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let frame = Frame::new(Opcode::ChatMessage, &b"payload"[..]);
        let mut encoded = BytesMut::from(&frame.encode_to_bytes()[..]);
        encoded[0] = 0x00;

        let err = Frame::decode(&mut encoded, DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_declared_length_over_limit() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(Opcode::ChatMessage as u8);
        buf.put_u32(u32::MAX);

        let err = Frame::decode(&mut buf, DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(matches!(err, RelayError::MalformedFrame(_)));
    }

    #[test]
    fn test_unknown_opcode_decodes_as_raw_byte() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(0x7B); // not in the opcode table
        buf.put_u32(0);

        let frame = Frame::decode(&mut buf, DEFAULT_MAX_PAYLOAD_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(frame.opcode, 0x7B);
        assert!(frame.opcode().is_none());
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty(Opcode::Ping);
        assert_eq!(frame.encoded_size(), FRAME_HEADER_SIZE);

        let mut buf = BytesMut::from(&frame.encode_to_bytes()[..]);
        let decoded = Frame::decode(&mut buf, DEFAULT_MAX_PAYLOAD_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(frame, decoded);
    }
}
