//! Wire protocol between session clients and the room relay.
//!
//! Every frame on the wire is a bincode-encoded [`Frame`]:
//! ```text
//! client                          relay
//!   │ ── Hello {room, identity, role, join_request?} ──► │
//!   │ ◄──────────── Welcome | Rejected ───────────────── │
//!   │ ◄═══════════ Message(Envelope) ═══════════════════► │
//! ```
//!
//! An [`Envelope`] names its sender and, optionally, a single recipient;
//! without a recipient the relay fans it out to every admitted member of
//! the room except the sender.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::join_gate::DenyReason;
use crate::presence::{Activity, Identity, Role};
use crate::scene::{Pointer, SceneSnapshot};

/// Logical message carried inside an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    /// Requester → owner
    JoinRequest { request_id: Uuid, requester: Identity },
    /// Owner → requester
    JoinApproved { request_id: Uuid },
    /// Owner → requester
    JoinDenied { request_id: Uuid, reason: DenyReason },
    /// Requester → owner, withdraws a queued request
    JoinCancelled { request_id: Uuid },
    PresenceAnnounce {
        identity: Identity,
        role: Role,
        in_call: bool,
        /// Sent right after a reconnect; the sender's own scene follows.
        resync: bool,
    },
    PresenceHeartbeat {
        identity: Identity,
        role: Role,
        activity: Activity,
        /// Monotonic per-sender counter.
        timestamp: u64,
    },
    /// Always a full snapshot; latest broadcast wins.
    SceneUpdate { snapshot: SceneSnapshot },
    PointerUpdate { pointer: Pointer },
    /// Owner → room, removes `target`
    Kick { target: Uuid },
    Leave { id: Uuid },
}

impl Message {
    /// Wire name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::JoinRequest { .. } => "join_request",
            Message::JoinApproved { .. } => "join_approved",
            Message::JoinDenied { .. } => "join_denied",
            Message::JoinCancelled { .. } => "join_cancelled",
            Message::PresenceAnnounce { .. } => "presence_announce",
            Message::PresenceHeartbeat { .. } => "presence_heartbeat",
            Message::SceneUpdate { .. } => "scene_update",
            Message::PointerUpdate { .. } => "pointer_update",
            Message::Kick { .. } => "kick",
            Message::Leave { .. } => "leave",
        }
    }

    /// Messages only the room owner may originate.
    pub fn is_owner_only(&self) -> bool {
        matches!(
            self,
            Message::JoinApproved { .. } | Message::JoinDenied { .. } | Message::Kick { .. }
        )
    }
}

/// Routing wrapper around a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub room_id: String,
    pub from: Uuid,
    /// `None` = every other admitted member of the room.
    pub to: Option<Uuid>,
    pub message: Message,
}

impl Envelope {
    /// Fan-out to the whole room.
    pub fn broadcast(room_id: impl Into<String>, from: Uuid, message: Message) -> Self {
        Self {
            room_id: room_id.into(),
            from,
            to: None,
            message,
        }
    }

    /// Deliver to a single participant.
    pub fn direct(room_id: impl Into<String>, from: Uuid, to: Uuid, message: Message) -> Self {
        Self {
            room_id: room_id.into(),
            from,
            to: Some(to),
            message,
        }
    }
}

/// Connection handshake sent as the first frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub room_id: String,
    pub identity: Identity,
    /// Role the client believes it holds; the relay verifies owner claims.
    pub role: Role,
    /// Present when joining a gated room as a non-owner.
    pub join_request: Option<Uuid>,
}

impl Hello {
    pub fn new(room_id: impl Into<String>, identity: Identity, role: Role) -> Self {
        Self {
            room_id: room_id.into(),
            identity,
            role,
            join_request: None,
        }
    }

    pub fn with_join_request(mut self, request_id: Uuid) -> Self {
        self.join_request = Some(request_id);
        self
    }

    /// The `join_request` message implied by this handshake, if any.
    pub fn join_request_message(&self) -> Option<Message> {
        self.join_request.map(|request_id| Message::JoinRequest {
            request_id,
            requester: self.identity.clone(),
        })
    }
}

/// Top-level transport frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Hello(Hello),
    Welcome { members: usize },
    Rejected { reason: String },
    Message(Envelope),
}

impl Frame {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(frame)
    }

    pub fn into_envelope(self) -> Result<Envelope, ProtocolError> {
        match self {
            Frame::Message(envelope) => Ok(envelope),
            _ => Err(ProtocolError::UnexpectedFrame { expected: "message" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Element;

    fn roundtrip(frame: &Frame) -> Frame {
        Frame::decode(&frame.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_scene_update_roundtrip() {
        let snapshot = SceneSnapshot::new(vec![
            Element::new("a", 1).with_payload(vec![1, 2, 3]),
            Element::new("b", 4),
        ])
        .with_asset("img", vec![9; 32]);
        let frame = Frame::Message(Envelope::broadcast(
            "room-42",
            Uuid::new_v4(),
            Message::SceneUpdate { snapshot: snapshot.clone() },
        ));

        match roundtrip(&frame) {
            Frame::Message(env) => {
                assert_eq!(env.room_id, "room-42");
                assert!(env.to.is_none());
                assert_eq!(env.message, Message::SceneUpdate { snapshot });
            }
            other => panic!("Wrong frame: {other:?}"),
        }
    }

    #[test]
    fn test_hello_carries_join_request() {
        let identity = Identity::new("Bob").with_avatar("bob.png");
        let request_id = Uuid::new_v4();
        let hello = Hello::new("room-42", identity.clone(), Role::Member).with_join_request(request_id);

        let decoded = roundtrip(&Frame::Hello(hello.clone()));
        assert_eq!(decoded, Frame::Hello(hello.clone()));
        assert_eq!(
            hello.join_request_message(),
            Some(Message::JoinRequest { request_id, requester: identity })
        );
    }

    #[test]
    fn test_owner_only_messages() {
        assert!(Message::Kick { target: Uuid::new_v4() }.is_owner_only());
        assert!(Message::JoinApproved { request_id: Uuid::new_v4() }.is_owner_only());
        assert!(!Message::Leave { id: Uuid::new_v4() }.is_owner_only());
        assert!(!Message::JoinCancelled { request_id: Uuid::new_v4() }.is_owner_only());
    }

    #[test]
    fn test_direct_envelope() {
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let env = Envelope::direct("r", from, to, Message::JoinApproved { request_id: Uuid::nil() });
        assert_eq!(env.to, Some(to));
        assert_eq!(env.message.kind(), "join_approved");
    }

    #[test]
    fn test_into_envelope_rejects_control_frames() {
        assert!(Frame::Welcome { members: 1 }.into_envelope().is_err());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(Frame::decode(&garbage).is_err());
    }
}
