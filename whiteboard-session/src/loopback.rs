//! In-process room relay.
//!
//! `RelayHub` is the routing core shared by the in-process transport
//! ([`LocalConnector`]) and the WebSocket relay server. It enforces the
//! room rules a real relay would:
//!
//! - only the room owner may claim the owner role
//! - non-owners of a gated room stay *pending* until the owner approves
//! - pending members may only talk to the owner (cancel / leave)
//! - approve, deny and kick are dropped unless they come from the owner
//! - a sender may not impersonate another participant
//!
//! Delivery uses bounded per-member queues; a full queue drops the
//! envelope rather than blocking the router.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::channel::{ChannelSink, Connector, SyncChannel};
use crate::directory::{RoomDirectory, RoomInfo};
use crate::error::SessionError;
use crate::join_gate::DenyReason;
use crate::presence::{Identity, Role};
use crate::protocol::{Envelope, Hello, Message};

/// Relay counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub total_connections: u64,
    pub messages_routed: u64,
    pub messages_dropped: u64,
    pub active_rooms: usize,
}

struct AtomicHubStats {
    total_connections: AtomicU64,
    messages_routed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicHubStats {
    fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

struct Member {
    tx: mpsc::Sender<Envelope>,
    connection: u64,
    admitted: bool,
    pending_request: Option<Uuid>,
}

struct HubRoom {
    owner: Uuid,
    gated: bool,
    members: HashMap<Uuid, Member>,
    /// Non-owners allowed back in without a new approval.
    approved: HashSet<Uuid>,
}

impl HubRoom {
    fn admitted_count(&self) -> usize {
        self.members.values().filter(|m| m.admitted).count()
    }
}

/// A successful [`RelayHub::attach`].
pub struct Attachment {
    pub room_id: String,
    pub member_id: Uuid,
    /// Distinguishes this connection from an earlier one by the same member.
    pub connection: u64,
    /// Members attached after this one joined, itself included.
    pub members: usize,
    pub incoming: mpsc::Receiver<Envelope>,
}

pub struct RelayHub {
    relay_url: String,
    rooms: Mutex<HashMap<String, HubRoom>>,
    reachable: AtomicBool,
    next_connection: AtomicU64,
    stats: AtomicHubStats,
}

impl RelayHub {
    /// `relay_url` is what directory lookups report for rooms on this hub.
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            rooms: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            next_connection: AtomicU64::new(1),
            stats: AtomicHubStats::new(),
        }
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Register a new room owned by `owner`.
    pub fn create_room(&self, owner: &Identity, gated: bool) -> RoomInfo {
        let room_id = format!("room-{}", Uuid::new_v4().simple());
        self.open_room(&room_id, owner.id, gated);
        RoomInfo {
            room_id,
            relay_url: self.relay_url.clone(),
            role: Role::Owner,
            member_count: 0,
            owner_id: Some(owner.id),
            gated,
        }
    }

    /// Register a room under a caller-chosen id. Existing rooms are kept.
    pub fn open_room(&self, room_id: &str, owner_id: Uuid, gated: bool) {
        self.rooms
            .lock()
            .entry(room_id.to_string())
            .or_insert_with(|| HubRoom {
                owner: owner_id,
                gated,
                members: HashMap::new(),
                approved: HashSet::new(),
            });
        log::info!("Room {room_id} opened (owner {owner_id}, gated: {gated})");
    }

    /// Directory view of `room_id` for `requester`.
    pub fn room_info(&self, room_id: &str, requester: &Identity) -> Option<RoomInfo> {
        let rooms = self.rooms.lock();
        let room = rooms.get(room_id)?;
        Some(RoomInfo {
            room_id: room_id.to_string(),
            relay_url: self.relay_url.clone(),
            role: if requester.id == room.owner {
                Role::Owner
            } else {
                Role::Member
            },
            member_count: room.admitted_count(),
            owner_id: Some(room.owner),
            gated: room.gated,
        })
    }

    /// Admit a connection after its `Hello`.
    pub fn attach(&self, hello: Hello, capacity: usize) -> Result<Attachment, SessionError> {
        if !self.reachable.load(Ordering::Relaxed) {
            return Err(SessionError::ConnectFailed("relay unreachable".into()));
        }

        let mut rooms = self.rooms.lock();
        let room = rooms
            .get_mut(&hello.room_id)
            .ok_or_else(|| SessionError::RoomUnavailable(format!("unknown room {}", hello.room_id)))?;

        let member_id = hello.identity.id;
        let is_owner = member_id == room.owner;
        if hello.role == Role::Owner && !is_owner {
            log::warn!("Rejecting false owner claim by {member_id} in {}", hello.room_id);
            return Err(SessionError::RoomUnavailable("not the room owner".into()));
        }

        let admitted = is_owner || !room.gated || room.approved.contains(&member_id);
        let pending_request = if admitted { None } else { hello.join_request };
        if !admitted && pending_request.is_none() {
            return Err(SessionError::RoomUnavailable("join approval required".into()));
        }
        if admitted && !is_owner {
            room.approved.insert(member_id);
        }

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let previous = room.members.insert(
            member_id,
            Member {
                tx,
                connection,
                admitted,
                pending_request,
            },
        );
        if previous.is_some() {
            log::debug!("Member {member_id} superseded its previous connection");
        }
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        if let (Some(request_id), Some(message)) = (pending_request, hello.join_request_message()) {
            let owner = room.owner;
            match room.members.get(&owner) {
                Some(owner_member) => {
                    let envelope = Envelope::direct(&hello.room_id, member_id, owner, message);
                    self.deliver(&owner_member.tx, envelope);
                }
                None => {
                    log::info!("Owner of {} is not connected, denying {member_id}", hello.room_id);
                    let denial = Envelope::direct(
                        &hello.room_id,
                        owner,
                        member_id,
                        Message::JoinDenied {
                            request_id,
                            reason: DenyReason::OwnerUnavailable,
                        },
                    );
                    if let Some(requester) = room.members.get(&member_id) {
                        self.deliver(&requester.tx, denial);
                    }
                }
            }
        }

        log::info!(
            "{} ({member_id}) attached to {} ({})",
            hello.identity.name,
            hello.room_id,
            if admitted { "admitted" } else { "pending" }
        );

        Ok(Attachment {
            room_id: hello.room_id,
            member_id,
            connection,
            members: room.members.len(),
            incoming: rx,
        })
    }

    /// Route one envelope from an attached connection.
    ///
    /// Returns the number of recipients, or `TransportLost` when the
    /// connection is no longer attached.
    pub fn route(
        &self,
        room_id: &str,
        from: Uuid,
        connection: u64,
        envelope: Envelope,
    ) -> Result<usize, SessionError> {
        let mut rooms = self.rooms.lock();
        let room = rooms.get_mut(room_id).ok_or(SessionError::TransportLost)?;
        let sender_admitted = room
            .members
            .get(&from)
            .filter(|m| m.connection == connection)
            .map(|m| m.admitted)
            .ok_or(SessionError::TransportLost)?;

        if envelope.from != from || envelope.room_id != room_id {
            log::warn!("Dropping spoofed {} from {from}", envelope.message.kind());
            return Ok(self.dropped());
        }
        let from_owner = from == room.owner;
        if envelope.message.is_owner_only() && !from_owner {
            log::warn!("Dropping {} from non-owner {from}", envelope.message.kind());
            return Ok(self.dropped());
        }

        if !sender_admitted {
            // Pending requesters may only withdraw.
            return match envelope.message {
                Message::JoinCancelled { .. } | Message::Leave { .. } => {
                    if let Some(member) = room.members.get_mut(&from) {
                        member.pending_request = None;
                    }
                    let owner = room.owner;
                    Ok(room
                        .members
                        .get(&owner)
                        .map_or(0, |m| usize::from(self.deliver(&m.tx, envelope))))
                }
                _ => Ok(self.dropped()),
            };
        }

        match &envelope.message {
            Message::JoinApproved { request_id } => {
                if let Some(target) = envelope.to.and_then(|to| room.members.get_mut(&to)) {
                    if target.pending_request == Some(*request_id) {
                        target.admitted = true;
                        target.pending_request = None;
                    }
                }
                if let Some(to) = envelope.to {
                    if room.members.get(&to).is_some_and(|m| m.admitted) {
                        room.approved.insert(to);
                    }
                }
            }
            Message::JoinDenied { request_id, .. } => {
                if let Some(target) = envelope.to.and_then(|to| room.members.get_mut(&to)) {
                    if target.pending_request == Some(*request_id) {
                        target.pending_request = None;
                    }
                }
            }
            _ => {}
        }

        let delivered = match envelope.to {
            Some(to) => match room.members.get(&to) {
                Some(target) if target.admitted || from_owner => {
                    usize::from(self.deliver(&target.tx, envelope.clone()))
                }
                _ => 0,
            },
            None => room
                .members
                .iter()
                .filter(|(id, m)| **id != from && m.admitted)
                .map(|(_, m)| usize::from(self.deliver(&m.tx, envelope.clone())))
                .sum(),
        };

        if let Message::Kick { target } = envelope.message {
            room.approved.remove(&target);
            if target != room.owner && room.members.remove(&target).is_some() {
                log::info!("Kicked {target} from {room_id}");
            }
        }

        Ok(delivered)
    }

    /// A connection ended. Stale connection ids are ignored.
    pub fn detach(&self, room_id: &str, member_id: Uuid, connection: u64) {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        if !room
            .members
            .get(&member_id)
            .is_some_and(|m| m.connection == connection)
        {
            return;
        }
        self.remove_member(room_id, room, member_id);
    }

    /// Sever a member's connection as if the network failed.
    pub fn drop_connection(&self, room_id: &str, member_id: Uuid) -> bool {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        if !room.members.contains_key(&member_id) {
            return false;
        }
        self.remove_member(room_id, room, member_id);
        true
    }

    /// While unreachable every new `attach` fails with `ConnectFailed`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    pub fn is_attached(&self, room_id: &str, member_id: &Uuid) -> bool {
        self.rooms
            .lock()
            .get(room_id)
            .is_some_and(|room| room.members.contains_key(member_id))
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            messages_routed: self.stats.messages_routed.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_rooms: self.rooms.lock().len(),
        }
    }

    fn remove_member(&self, room_id: &str, room: &mut HubRoom, member_id: Uuid) {
        let Some(member) = room.members.remove(&member_id) else {
            return;
        };
        log::info!("{member_id} detached from {room_id}");

        let leave = Envelope::broadcast(room_id, member_id, Message::Leave { id: member_id });
        if member.admitted {
            for other in room.members.values().filter(|m| m.admitted) {
                self.deliver(&other.tx, leave.clone());
            }
        } else if member.pending_request.is_some() {
            if let Some(owner) = room.members.get(&room.owner) {
                self.deliver(&owner.tx, leave);
            }
        }

        if member_id == room.owner {
            for (id, pending) in room.members.iter_mut().filter(|(_, m)| !m.admitted) {
                if let Some(request_id) = pending.pending_request.take() {
                    let denial = Envelope::direct(
                        room_id,
                        member_id,
                        *id,
                        Message::JoinDenied {
                            request_id,
                            reason: DenyReason::OwnerUnavailable,
                        },
                    );
                    self.deliver(&pending.tx, denial);
                }
            }
        }
    }

    fn deliver(&self, tx: &mpsc::Sender<Envelope>, envelope: Envelope) -> bool {
        match tx.try_send(envelope) {
            Ok(()) => {
                self.stats.messages_routed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(envelope)) => {
                log::warn!("Member queue full, dropping {}", envelope.message.kind());
                self.dropped();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn dropped(&self) -> usize {
        self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
        0
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new("local://relay")
    }
}

// ============================================================================
// In-process transport and directory
// ============================================================================

struct HubSink {
    hub: Arc<RelayHub>,
    room_id: String,
    member_id: Uuid,
    connection: u64,
}

impl HubSink {
    fn route(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.hub
            .route(&self.room_id, self.member_id, self.connection, envelope)
            .map(|_| ())
    }
}

#[async_trait]
impl ChannelSink for HubSink {
    async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.route(envelope)
    }

    fn try_send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.route(envelope)
    }

    fn close(&self) {
        self.hub.detach(&self.room_id, self.member_id, self.connection);
    }
}

/// Connects controllers to a [`RelayHub`] in the same process.
#[derive(Clone)]
pub struct LocalConnector {
    hub: Arc<RelayHub>,
    capacity: usize,
}

impl LocalConnector {
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self { hub, capacity: 256 }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, relay_url: &str, hello: Hello) -> Result<SyncChannel, SessionError> {
        log::debug!("Local connect to {relay_url} for room {}", hello.room_id);
        let attachment = self.hub.attach(hello, self.capacity)?;
        let sink = HubSink {
            hub: self.hub.clone(),
            room_id: attachment.room_id,
            member_id: attachment.member_id,
            connection: attachment.connection,
        };
        Ok(SyncChannel::new(Box::new(sink), attachment.incoming))
    }
}

/// Directory backed by a [`RelayHub`].
#[derive(Clone)]
pub struct LocalDirectory {
    hub: Arc<RelayHub>,
    gated: bool,
}

impl LocalDirectory {
    /// Rooms created through this directory are gated.
    pub fn new(hub: Arc<RelayHub>) -> Self {
        Self { hub, gated: true }
    }

    pub fn ungated(hub: Arc<RelayHub>) -> Self {
        Self { hub, gated: false }
    }
}

#[async_trait]
impl RoomDirectory for LocalDirectory {
    async fn create_room(&self, owner: &Identity) -> Result<RoomInfo, SessionError> {
        Ok(self.hub.create_room(owner, self.gated))
    }

    async fn room_info(&self, room_id: &str, requester: &Identity) -> Result<RoomInfo, SessionError> {
        self.hub
            .room_info(room_id, requester)
            .ok_or_else(|| SessionError::RoomUnavailable(format!("unknown room {room_id}")))
    }
}
