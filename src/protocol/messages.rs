//! Positional payload encodings carried inside frames
//!
//! Payloads are fixed concatenations of length-prefixed fields with no tags:
//! decoding has no self-description, so field order is part of the wire
//! contract and must never change.
//!
//! String sub-encoding: 2-byte big-endian length prefix followed by UTF-8
//! bytes. List sub-encoding: 2-byte big-endian element count followed by
//! that many strings.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RelayError, Result};

/// Hard cap on a single string field, imposed by the 2-byte length prefix
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Write a length-prefixed string field.
///
/// Strings over [`MAX_STRING_LEN`] bytes are rejected rather than silently
/// truncated; upstream layers are expected to cap logical inputs well below
/// this.
pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(RelayError::protocol(format!(
            "string field of {} bytes exceeds the {} byte wire limit",
            s.len(),
            MAX_STRING_LEN
        )));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Read a length-prefixed string field
pub fn get_string(buf: &mut impl Buf) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(RelayError::protocol("truncated string length prefix"));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(RelayError::protocol(format!(
            "string field declares {} bytes but only {} remain",
            len,
            buf.remaining()
        )));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| RelayError::protocol("string field is not valid UTF-8"))
}

/// Write a count-prefixed list of strings
pub fn put_string_list(buf: &mut BytesMut, items: &[String]) -> Result<()> {
    if items.len() > u16::MAX as usize {
        return Err(RelayError::protocol(format!(
            "list of {} entries exceeds the wire limit",
            items.len()
        )));
    }
    buf.put_u16(items.len() as u16);
    for item in items {
        put_string(buf, item)?;
    }
    Ok(())
}

/// Read a count-prefixed list of strings
pub fn get_string_list(buf: &mut impl Buf) -> Result<Vec<String>> {
    if buf.remaining() < 2 {
        return Err(RelayError::protocol("truncated list count prefix"));
    }
    let count = buf.get_u16() as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(get_string(buf)?);
    }
    Ok(items)
}

/// Read only the first string of a payload, leaving the rest untouched.
///
/// The call-signaling relay peeks the destination this way and forwards the
/// original payload bytes unmodified.
pub fn leading_string(payload: &[u8]) -> Result<String> {
    let mut buf = payload;
    get_string(&mut buf)
}

/// Encode a payload that is a single string (HANDSHAKE, CHAT_JOIN,
/// VOICE_JOIN/LEAVE, ERROR, CALL_FAILED)
pub fn encode_string_payload(s: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(2 + s.len());
    put_string(&mut buf, s)?;
    Ok(buf.freeze())
}

/// Decode a single-string payload
pub fn decode_string_payload(payload: &[u8]) -> Result<String> {
    let mut buf = payload;
    get_string(&mut buf)
}

/// Encode a USERS_ONLINE payload (plain string list)
pub fn encode_user_list(users: &[String]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    put_string_list(&mut buf, users)?;
    Ok(buf.freeze())
}

/// Decode a USERS_ONLINE payload
pub fn decode_user_list(payload: &[u8]) -> Result<Vec<String>> {
    let mut buf = payload;
    get_string_list(&mut buf)
}

/// USER_JOIN payload: {username, avatar}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPayload {
    pub username: String,
    pub avatar: String,
}

impl JoinPayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.username)?;
        put_string(&mut buf, &self.avatar)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            username: get_string(&mut buf)?,
            avatar: get_string(&mut buf)?,
        })
    }
}

/// Chat message composite: {username, avatar, body, timestamp}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessagePayload {
    pub username: String,
    pub avatar: String,
    pub body: String,
    pub timestamp: String,
}

impl ChatMessagePayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        put_string(buf, &self.username)?;
        put_string(buf, &self.avatar)?;
        put_string(buf, &self.body)?;
        put_string(buf, &self.timestamp)?;
        Ok(())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Self::decode_from(&mut buf)
    }

    pub fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self {
            username: get_string(buf)?,
            avatar: get_string(buf)?,
            body: get_string(buf)?,
            timestamp: get_string(buf)?,
        })
    }
}

/// CHAT_MESSAGE payload: community id followed by the chat composite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomChatPayload {
    pub community_id: String,
    pub message: ChatMessagePayload,
}

impl RoomChatPayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.community_id)?;
        self.message.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            community_id: get_string(&mut buf)?,
            message: ChatMessagePayload::decode_from(&mut buf)?,
        })
    }
}

/// TYPING_START / TYPING_STOP payload: {community id, username}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingPayload {
    pub community_id: String,
    pub username: String,
}

impl TypingPayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.community_id)?;
        put_string(&mut buf, &self.username)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            community_id: get_string(&mut buf)?,
            username: get_string(&mut buf)?,
        })
    }
}

/// VOICE_USERS payload: {community id, member list}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterPayload {
    pub community_id: String,
    pub members: Vec<String>,
}

impl RosterPayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.community_id)?;
        put_string_list(&mut buf, &self.members)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            community_id: get_string(&mut buf)?,
            members: get_string_list(&mut buf)?,
        })
    }
}

/// DM_SEND / DM_RECEIVE / DM_SENT payload: {to, from, avatar, body}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessagePayload {
    pub to: String,
    pub from: String,
    pub avatar: String,
    pub body: String,
}

impl DirectMessagePayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.to)?;
        put_string(&mut buf, &self.from)?;
        put_string(&mut buf, &self.avatar)?;
        put_string(&mut buf, &self.body)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            to: get_string(&mut buf)?,
            from: get_string(&mut buf)?,
            avatar: get_string(&mut buf)?,
            body: get_string(&mut buf)?,
        })
    }
}

/// CALL_OFFER / CALL_ANSWER payload: {destination, origin, opaque data}
///
/// The data field carries a session description the relay never inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignalPayload {
    pub to: String,
    pub from: String,
    pub data: String,
}

impl CallSignalPayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.to)?;
        put_string(&mut buf, &self.from)?;
        put_string(&mut buf, &self.data)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            to: get_string(&mut buf)?,
            from: get_string(&mut buf)?,
            data: get_string(&mut buf)?,
        })
    }
}

/// ICE_CANDIDATE payload: {destination, opaque data}. Carries no origin field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidatePayload {
    pub to: String,
    pub data: String,
}

impl IceCandidatePayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.to)?;
        put_string(&mut buf, &self.data)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            to: get_string(&mut buf)?,
            data: get_string(&mut buf)?,
        })
    }
}

/// CALL_ENDED / CALL_REJECTED payload: {destination, origin}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallControlPayload {
    pub to: String,
    pub from: String,
}

impl CallControlPayload {
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.to)?;
        put_string(&mut buf, &self.from)?;
        Ok(buf.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        Ok(Self {
            to: get_string(&mut buf)?,
            from: get_string(&mut buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_wire_layout() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "ab").unwrap();
        assert_eq!(&buf[..], &[0x00, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "héllo wörld").unwrap();
        let mut read = &buf[..];
        assert_eq!(get_string(&mut read).unwrap(), "héllo wörld");
        assert!(read.is_empty());
    }

    #[test]
    fn test_oversized_string_rejected() {
        let big = "x".repeat(MAX_STRING_LEN + 1);
        let mut buf = BytesMut::new();
        let err = put_string(&mut buf, &big).unwrap_err();
        assert!(matches!(err, RelayError::Protocol(_)));
    }

    #[test]
    fn test_max_len_string_accepted() {
        let big = "y".repeat(MAX_STRING_LEN);
        let mut buf = BytesMut::new();
        put_string(&mut buf, &big).unwrap();
        let mut read = &buf[..];
        assert_eq!(get_string(&mut read).unwrap().len(), MAX_STRING_LEN);
    }

    #[test]
    fn test_truncated_string_is_protocol_error() {
        // Declares 5 bytes, delivers 2.
        let raw = [0x00u8, 0x05, b'h', b'i'];
        let mut read = &raw[..];
        let err = get_string(&mut read).unwrap_err();
        assert!(matches!(err, RelayError::Protocol(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let raw = [0x00u8, 0x02, 0xFF, 0xFE];
        let mut read = &raw[..];
        assert!(get_string(&mut read).is_err());
    }

    #[test]
    fn test_user_list_roundtrip() {
        let users = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
        let encoded = encode_user_list(&users).unwrap();
        assert_eq!(&encoded[0..2], &[0x00, 0x03]);
        assert_eq!(decode_user_list(&encoded).unwrap(), users);
    }

    #[test]
    fn test_empty_user_list() {
        let encoded = encode_user_list(&[]).unwrap();
        assert_eq!(&encoded[..], &[0x00, 0x00]);
        assert!(decode_user_list(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_join_payload_field_order() {
        let join = JoinPayload {
            username: "ab".to_string(),
            avatar: "c".to_string(),
        };
        let encoded = join.encode().unwrap();
        // username first, avatar second: positional, no tags.
        assert_eq!(&encoded[..], &[0x00, 0x02, b'a', b'b', 0x00, 0x01, b'c']);
        assert_eq!(JoinPayload::decode(&encoded).unwrap(), join);
    }

    #[test]
    fn test_chat_message_roundtrip() {
        let msg = ChatMessagePayload {
            username: "alice".to_string(),
            avatar: "/uploads/default-1.png".to_string(),
            body: "hello room".to_string(),
            timestamp: "2026-08-29T12:00:00Z".to_string(),
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(ChatMessagePayload::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_room_chat_prefixes_community_id() {
        let payload = RoomChatPayload {
            community_id: "rust".to_string(),
            message: ChatMessagePayload {
                username: "bob".to_string(),
                avatar: String::new(),
                body: "hi".to_string(),
                timestamp: "0".to_string(),
            },
        };
        let encoded = payload.encode().unwrap();
        assert_eq!(leading_string(&encoded).unwrap(), "rust");
        assert_eq!(RoomChatPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_call_signal_roundtrip_and_destination_peek() {
        let offer = CallSignalPayload {
            to: "bob".to_string(),
            from: "alice".to_string(),
            data: r#"{"type":"offer","sdp":"v=0..."}"#.to_string(),
        };
        let encoded = offer.encode().unwrap();
        assert_eq!(leading_string(&encoded).unwrap(), "bob");
        assert_eq!(CallSignalPayload::decode(&encoded).unwrap(), offer);
    }

    #[test]
    fn test_ice_candidate_omits_origin() {
        let ice = IceCandidatePayload {
            to: "bob".to_string(),
            data: "candidate:1 1 UDP ...".to_string(),
        };
        let encoded = ice.encode().unwrap();
        assert_eq!(IceCandidatePayload::decode(&encoded).unwrap(), ice);
    }

    #[test]
    fn test_direct_message_roundtrip() {
        let dm = DirectMessagePayload {
            to: "bob".to_string(),
            from: "alice".to_string(),
            avatar: "/uploads/a.png".to_string(),
            body: "psst".to_string(),
        };
        let encoded = dm.encode().unwrap();
        assert_eq!(leading_string(&encoded).unwrap(), "bob");
        assert_eq!(DirectMessagePayload::decode(&encoded).unwrap(), dm);
    }

    #[test]
    fn test_roster_roundtrip() {
        let roster = RosterPayload {
            community_id: "gaming".to_string(),
            members: vec!["a".to_string(), "b".to_string()],
        };
        let encoded = roster.encode().unwrap();
        assert_eq!(RosterPayload::decode(&encoded).unwrap(), roster);
    }

    #[test]
    fn test_leading_string_ignores_trailing_garbage() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "dest").unwrap();
        buf.put_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(leading_string(&buf).unwrap(), "dest");
    }
}
