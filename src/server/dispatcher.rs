//! Inbound frame dispatch
//!
//! One exhaustive match over the opcode table. Handlers never write to the
//! socket directly; everything goes through [`ClientHandle`] queues so a
//! slow peer cannot stall dispatch. Payload decode failures surface as
//! protocol errors to the transport layer, which reports them on the ERROR
//! opcode and keeps the connection open.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::messages::{self, DirectMessagePayload, JoinPayload, RoomChatPayload};
use crate::protocol::{Frame, Opcode};
use crate::server::connection::{ClientHandle, Identity};
use crate::server::hub::Hub;
use crate::server::rooms::{chat_tag, voice_tag};

impl Hub {
    /// Handle one decoded inbound frame
    pub async fn dispatch(&self, conn: &Arc<ClientHandle>, frame: Frame) -> Result<()> {
        let Some(opcode) = Opcode::from_u8(frame.opcode) else {
            debug!(
                connection = %conn.id(),
                opcode = format_args!("{:#04x}", frame.opcode),
                "dropping frame with unknown opcode"
            );
            return Ok(());
        };

        match opcode {
            Opcode::Ping => {
                conn.send(&Frame::new(Opcode::Pong, frame.payload));
            }
            Opcode::Pong => {
                conn.mark_alive(true);
            }
            Opcode::Handshake => {
                debug!(connection = %conn.id(), "unexpected HANDSHAKE from peer");
            }
            Opcode::HandshakeAck => {
                debug!(connection = %conn.id(), "handshake acknowledged");
            }

            Opcode::UserJoin => self.handle_user_join(conn, &frame).await?,

            // Reserved: the opcode table defines these but nothing handles
            // them inbound yet.
            Opcode::UserLeave | Opcode::ChatLeave | Opcode::ChatHistory => {
                debug!(
                    connection = %conn.id(),
                    opcode = ?opcode,
                    "reserved opcode, no handler"
                );
            }

            Opcode::ChatJoin => self.handle_chat_join(conn, &frame).await?,
            Opcode::ChatMessage => self.handle_chat_message(&frame).await?,
            Opcode::TypingStart | Opcode::TypingStop => {
                self.handle_typing(conn, opcode, &frame).await?
            }

            Opcode::VoiceJoin => self.handle_voice_join(conn, &frame).await?,
            Opcode::VoiceLeave => self.handle_voice_leave(conn, &frame).await?,

            Opcode::DmSend => self.handle_direct_message(conn, &frame).await?,

            Opcode::CallOffer => {
                self.relay_call_signal(conn, opcode, &frame, Some("User is offline"))
                    .await?
            }
            Opcode::CallAnswer => {
                self.relay_call_signal(conn, opcode, &frame, Some("Recipient offline"))
                    .await?
            }
            Opcode::IceCandidate | Opcode::CallEnded | Opcode::CallRejected => {
                self.relay_call_signal(conn, opcode, &frame, None).await?
            }

            // Server-to-client opcodes arriving inbound are peer bugs.
            Opcode::UsersOnline
            | Opcode::VoiceUsers
            | Opcode::DmReceive
            | Opcode::DmSent
            | Opcode::CallFailed
            | Opcode::Error => {
                debug!(
                    connection = %conn.id(),
                    opcode = ?opcode,
                    "dropping server-to-client opcode received from peer"
                );
            }

            Opcode::Close => {
                debug!(connection = %conn.id(), "peer requested close");
                conn.close();
            }
        }

        Ok(())
    }

    /// USER_JOIN: bind an identity to this connection and re-announce presence
    async fn handle_user_join(&self, conn: &Arc<ClientHandle>, frame: &Frame) -> Result<()> {
        let join = JoinPayload::decode(&frame.payload)?;

        let avatar = if join.avatar.is_empty() {
            self.profiles
                .avatar_for(&join.username)
                .unwrap_or_default()
        } else {
            join.avatar
        };

        conn.set_identity(Identity {
            username: join.username.clone(),
            avatar,
        })
        .await;

        if let Some(superseded) = self.registry.bind_user(&join.username, conn.id()).await {
            debug!(
                username = %join.username,
                superseded = %superseded,
                "newer join superseded an existing binding"
            );
        }

        let online = self.registry.online_user_count().await;
        info!(
            username = %join.username,
            connection = %conn.id(),
            online,
            "user joined"
        );

        self.broadcast_presence().await;
        Ok(())
    }

    /// CHAT_JOIN: subscribe the connection to a chat room
    async fn handle_chat_join(&self, conn: &Arc<ClientHandle>, frame: &Frame) -> Result<()> {
        let community_id = messages::decode_string_payload(&frame.payload)?;
        conn.join_room(chat_tag(&community_id)).await;
        self.rooms.ensure_chat_room(&community_id).await;
        debug!(connection = %conn.id(), %community_id, "joined chat room");
        Ok(())
    }

    /// CHAT_MESSAGE: retain in history, then fan out to the whole room
    /// (sender included, which doubles as the delivery confirmation)
    async fn handle_chat_message(&self, frame: &Frame) -> Result<()> {
        let chat = RoomChatPayload::decode(&frame.payload)?;
        self.rooms.append_chat(&chat.community_id, chat.message).await;

        self.broadcast_to_room(
            &chat_tag(&chat.community_id),
            Frame::new(Opcode::ChatMessage, frame.payload.clone()),
            None,
        )
        .await;
        Ok(())
    }

    /// TYPING_START / TYPING_STOP: relay verbatim to the room, minus the
    /// typist (their UI already knows)
    async fn handle_typing(
        &self,
        conn: &Arc<ClientHandle>,
        opcode: Opcode,
        frame: &Frame,
    ) -> Result<()> {
        let community_id = messages::leading_string(&frame.payload)?;
        self.broadcast_to_room(
            &chat_tag(&community_id),
            Frame::new(opcode, frame.payload.clone()),
            Some(conn.id()),
        )
        .await;
        Ok(())
    }

    /// VOICE_JOIN: add to the roster and push the updated roster to the room
    async fn handle_voice_join(&self, conn: &Arc<ClientHandle>, frame: &Frame) -> Result<()> {
        let community_id = messages::decode_string_payload(&frame.payload)?;
        let username = conn.username().await.unwrap_or_else(|| "unknown".to_string());

        conn.join_room(voice_tag(&community_id)).await;
        let roster = self.rooms.voice_join(&community_id, &username).await;

        debug!(%username, %community_id, members = roster.len(), "joined voice room");
        self.broadcast_voice_roster(&community_id, roster).await;
        Ok(())
    }

    /// VOICE_LEAVE: mirror image of VOICE_JOIN. Leaving a room that never
    /// existed is silently ignored.
    async fn handle_voice_leave(&self, conn: &Arc<ClientHandle>, frame: &Frame) -> Result<()> {
        let community_id = messages::decode_string_payload(&frame.payload)?;
        let username = conn.username().await.unwrap_or_else(|| "unknown".to_string());

        if let Some(roster) = self.rooms.voice_leave(&community_id, &username).await {
            self.broadcast_voice_roster(&community_id, roster).await;
        }
        conn.leave_room(&voice_tag(&community_id)).await;
        Ok(())
    }

    /// DM_SEND: persist first, then forward to the recipient if online, and
    /// always confirm back to the sender
    async fn handle_direct_message(&self, conn: &Arc<ClientHandle>, frame: &Frame) -> Result<()> {
        let dm = DirectMessagePayload::decode(&frame.payload)?;

        self.store.append(&dm.from, &dm.to, &dm.body)?;

        match self.registry.by_username(&dm.to).await {
            Some(peer) => {
                peer.send(&Frame::new(Opcode::DmReceive, frame.payload.clone()));
            }
            None => {
                debug!(to = %dm.to, "direct message recipient offline, stored only");
            }
        }

        conn.send(&Frame::new(Opcode::DmSent, frame.payload.clone()));
        Ok(())
    }

    /// Forward a call-signaling frame to the destination named by its first
    /// payload field, leaving the payload bytes untouched.
    ///
    /// When the destination is offline, OFFER and ANSWER bounce a
    /// CALL_FAILED back to the initiator; the follow-up opcodes are dropped
    /// silently (the peer will already have been told the call is dead).
    async fn relay_call_signal(
        &self,
        conn: &Arc<ClientHandle>,
        opcode: Opcode,
        frame: &Frame,
        offline_reason: Option<&str>,
    ) -> Result<()> {
        let destination = messages::leading_string(&frame.payload)?;

        match self.registry.by_username(&destination).await {
            Some(peer) => {
                peer.send(&Frame::new(opcode, frame.payload.clone()));
            }
            None => match offline_reason {
                Some(reason) => {
                    warn!(
                        to = %destination,
                        opcode = ?opcode,
                        "call signal to offline user, failing the call"
                    );
                    let payload = messages::encode_string_payload(reason)?;
                    conn.send(&Frame::new(Opcode::CallFailed, payload));
                }
                None => {
                    debug!(
                        to = %destination,
                        opcode = ?opcode,
                        "dropping call signal to offline user"
                    );
                }
            },
        }
        Ok(())
    }
}
