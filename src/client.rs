//! Minimal protocol client
//!
//! Used by the integration tests and the connectivity check in the binary.
//! It speaks the frame protocol over one TCP stream and leaves every
//! higher-level concern (reconnect, event routing) to the caller.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::protocol::messages::{
    self, DirectMessagePayload, JoinPayload, RoomChatPayload,
};
use crate::protocol::{Frame, FrameCodec, Opcode};

pub struct RelayClient {
    stream: TcpStream,
    codec: FrameCodec,
    connection_id: Option<String>,
}

impl RelayClient {
    /// Open a TCP connection to a relay server
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        debug!(%addr, "client connected");
        Ok(Self {
            stream,
            codec: FrameCodec::new(),
            connection_id: None,
        })
    }

    /// Connection id assigned by the server, known after [`handshake`](Self::handshake)
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Write one frame to the stream
    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode_to_bytes();
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Read the next complete frame, waiting as long as it takes
    pub async fn recv(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.codec.decode_next()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(RelayError::connection("server closed the stream"));
            }
            self.codec.feed(&chunk[..n]);
        }
    }

    /// Read the next frame, bounded by a deadline
    pub async fn recv_timeout(&mut self, deadline: Duration) -> Result<Frame> {
        timeout(deadline, self.recv())
            .await
            .map_err(|_| RelayError::timeout("timed out waiting for a frame"))?
    }

    /// Read frames until one matches the wanted opcode, bounded by a
    /// deadline over the whole wait. Interleaved broadcasts (presence
    /// updates, pings) are skipped.
    pub async fn recv_opcode(&mut self, wanted: Opcode, deadline: Duration) -> Result<Frame> {
        timeout(deadline, async {
            loop {
                let frame = self.recv().await?;
                if frame.opcode() == Some(wanted) {
                    return Ok(frame);
                }
                debug!(got = ?frame.opcode(), want = ?wanted, "skipping frame");
            }
        })
        .await
        .map_err(|_| RelayError::timeout(format!("timed out waiting for {:?}", wanted)))?
    }

    /// Complete the session handshake: receive the server's HANDSHAKE,
    /// store the connection id and echo it back on HANDSHAKE_ACK.
    pub async fn handshake(&mut self) -> Result<String> {
        let frame = self.recv_opcode(Opcode::Handshake, Duration::from_secs(5)).await?;
        let id = messages::decode_string_payload(&frame.payload)?;

        let ack = messages::encode_string_payload(&id)?;
        self.send(&Frame::new(Opcode::HandshakeAck, ack)).await?;

        self.connection_id = Some(id.clone());
        Ok(id)
    }

    /// Announce an identity (USER_JOIN)
    pub async fn join(&mut self, username: &str, avatar: &str) -> Result<()> {
        let payload = JoinPayload {
            username: username.to_string(),
            avatar: avatar.to_string(),
        }
        .encode()?;
        self.send(&Frame::new(Opcode::UserJoin, payload)).await
    }

    /// Subscribe to a community chat room
    pub async fn join_chat(&mut self, community_id: &str) -> Result<()> {
        let payload = messages::encode_string_payload(community_id)?;
        self.send(&Frame::new(Opcode::ChatJoin, payload)).await
    }

    /// Send a chat message into a community room
    pub async fn send_chat(&mut self, community_id: &str, message: messages::ChatMessagePayload) -> Result<()> {
        let payload = RoomChatPayload {
            community_id: community_id.to_string(),
            message,
        }
        .encode()?;
        self.send(&Frame::new(Opcode::ChatMessage, payload)).await
    }

    /// Join a voice room
    pub async fn join_voice(&mut self, community_id: &str) -> Result<()> {
        let payload = messages::encode_string_payload(community_id)?;
        self.send(&Frame::new(Opcode::VoiceJoin, payload)).await
    }

    /// Leave a voice room
    pub async fn leave_voice(&mut self, community_id: &str) -> Result<()> {
        let payload = messages::encode_string_payload(community_id)?;
        self.send(&Frame::new(Opcode::VoiceLeave, payload)).await
    }

    /// Send a direct message
    pub async fn send_dm(&mut self, to: &str, from: &str, avatar: &str, body: &str) -> Result<()> {
        let payload = DirectMessagePayload {
            to: to.to_string(),
            from: from.to_string(),
            avatar: avatar.to_string(),
            body: body.to_string(),
        }
        .encode()?;
        self.send(&Frame::new(Opcode::DmSend, payload)).await
    }

    /// Send a PING and wait for the matching PONG
    pub async fn ping(&mut self, payload: &[u8]) -> Result<Frame> {
        self.send(&Frame::new(Opcode::Ping, payload.to_vec())).await?;
        self.recv_opcode(Opcode::Pong, Duration::from_secs(5)).await
    }
}
