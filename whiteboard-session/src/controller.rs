//! Session controller: the single owner of all collaboration state.
//!
//! ## Lifecycle
//!
//! ```text
//!  Idle ──► Connecting ──┬──► Active ◄────────► Reconnecting ──► Stopped (exhausted)
//!                        │      ▲  │                  ▲
//!                        │      │  └── stop / kick ───┼──────────► Stopped
//!                        └──► AwaitingApproval ───────┘
//!                               │
//!                               └── denied / cancelled ─────────► Left
//! ```
//!
//! Every mutation goes through `&mut self`, so the controller must be
//! driven from a single task (see [`crate::runtime::Session`]). Observers
//! get a [`SessionEvent`] stream and a [`SessionView`] projection.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::channel::{Connector, SyncChannel};
use crate::config::SessionConfig;
use crate::directory::RoomDirectory;
use crate::error::SessionError;
use crate::fingerprint::ChangeDetector;
use crate::join_gate::{Decision, DenyReason, JoinGate, PendingJoinRequest};
use crate::presence::{Activity, Collaborator, Identity, PresenceRegistry, Role, Upsert};
use crate::protocol::{Envelope, Hello, Message};
use crate::scene::{Pointer, SceneSnapshot};
use crate::supervisor::{Backoff, ConnectionState, ReconnectSupervisor, Supervision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    AwaitingApproval,
    Active,
    Reconnecting,
    Left,
    Stopped,
}

/// The room this controller is (or was last) part of.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSession {
    pub room_id: String,
    pub owner_id: Option<Uuid>,
    pub relay_url: String,
    pub role: Role,
    pub gated: bool,
    pub created_at: Instant,
    /// Set until the owner approves us.
    pub join_request: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    /// Apply this snapshot to the local document.
    RemoteScene { from: Uuid, snapshot: SceneSnapshot },
    RemotePointer { from: Uuid, pointer: Pointer },
    JoinRequested { request_id: Uuid, requester: Identity },
    CollaboratorJoined { id: Uuid, name: String },
    CollaboratorLeft { id: Uuid },
    Error(SessionError),
}

/// Read-only projection for UI binding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub connection: ConnectionState,
    pub is_collaborating: bool,
    pub is_owner: bool,
    pub is_offline: bool,
    pub is_pending_approval: bool,
    pub error: Option<SessionError>,
    pub error_message: Option<String>,
    pub room_id: Option<String>,
    pub collaborators: Vec<Collaborator>,
    pub pending_join_requests: Vec<PendingJoinRequest>,
}

pub struct SessionController {
    identity: Identity,
    config: SessionConfig,
    directory: Arc<dyn RoomDirectory>,
    connector: Arc<dyn Connector>,

    phase: SessionPhase,
    session: Option<RoomSession>,
    channel: Option<SyncChannel>,
    registry: PresenceRegistry,
    gate: JoinGate,
    detector: ChangeDetector,
    supervisor: ReconnectSupervisor,
    reconnect_at: Option<Instant>,
    is_offline: bool,
    error: Option<SessionError>,

    local_scene: SceneSnapshot,
    in_call: bool,
    local_activity: Activity,
    last_local_activity: Instant,
    last_heartbeat: Option<Instant>,
    heartbeat_seq: u64,

    events: broadcast::Sender<SessionEvent>,
    view_tx: watch::Sender<SessionView>,
}

impl SessionController {
    pub fn new(
        identity: Identity,
        config: SessionConfig,
        directory: Arc<dyn RoomDirectory>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(16));
        let (view_tx, _) = watch::channel(SessionView::default());
        Self {
            registry: PresenceRegistry::new(config.max_collaborators, config.presence_timeout()),
            supervisor: ReconnectSupervisor::new(Backoff::from_config(&config)),
            identity,
            config,
            directory,
            connector,
            phase: SessionPhase::Idle,
            session: None,
            channel: None,
            gate: JoinGate::new(),
            detector: ChangeDetector::new(),
            reconnect_at: None,
            is_offline: false,
            error: None,
            local_scene: SceneSnapshot::default(),
            in_call: false,
            local_activity: Activity::Active,
            last_local_activity: Instant::now(),
            last_heartbeat: None,
            heartbeat_seq: 0,
            events,
            view_tx,
        }
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Create a room (no id) and become its owner, or join an existing one.
    ///
    /// Lookup and connect failures are also recorded as the current error.
    pub async fn start_collaboration(&mut self, room_id: Option<&str>) -> Result<(), SessionError> {
        if self.has_live_session() {
            log::warn!("Ignoring start: a collaboration session is already active");
            return Err(SessionError::AlreadyActive);
        }
        // A session retained after exhausted retries is discarded.
        self.teardown();
        self.set_phase(SessionPhase::Connecting);

        let lookup = match room_id {
            None => self.directory.create_room(&self.identity).await,
            Some(id) => self.directory.room_info(id, &self.identity).await,
        };
        let info = match lookup {
            Ok(info) => info,
            Err(e) => return Err(self.fail_start(e)),
        };

        let role = if room_id.is_none() { Role::Owner } else { info.role };
        let owner_id = match role {
            Role::Owner => Some(self.identity.id),
            Role::Member => info.owner_id,
        };
        let session = RoomSession {
            room_id: info.room_id,
            owner_id,
            relay_url: info.relay_url,
            role,
            gated: info.gated,
            created_at: Instant::now(),
            join_request: (role == Role::Member && info.gated).then(Uuid::new_v4),
        };

        let hello = self.hello(&session);
        self.supervisor.attempt_started();
        match self.connector.connect(&session.relay_url, hello).await {
            Ok(channel) => {
                self.supervisor.connected();
                self.channel = Some(channel);
                self.registry
                    .reset_current_user(&self.identity, role, Instant::now());
                let awaiting = session.join_request.is_some();
                log::info!(
                    "{} room {} as {:?}",
                    if room_id.is_none() { "Created" } else { "Joined" },
                    session.room_id,
                    role
                );
                self.session = Some(session);
                if awaiting {
                    self.set_phase(SessionPhase::AwaitingApproval);
                } else {
                    self.activate(false).await;
                }
                self.publish();
                Ok(())
            }
            Err(e) => {
                self.supervisor.reset();
                Err(self.fail_start(e))
            }
        }
    }

    /// Leave the room and drop all session state. Safe to call repeatedly.
    pub async fn stop_session(&mut self) {
        if self.session.is_none() && self.channel.is_none() {
            return;
        }

        if self.channel.is_some() {
            if self.is_owner() {
                for resolution in self.gate.deny_all(DenyReason::OwnerUnavailable) {
                    let requester = resolution.requester_id();
                    self.send(resolution.reply, Some(requester)).await;
                }
            }
            if self.phase == SessionPhase::AwaitingApproval {
                self.send_join_cancelled().await;
            }
            self.send(Message::Leave { id: self.identity.id }, None).await;
        }

        self.teardown();
        log::info!("Collaboration session stopped");
        self.set_phase(SessionPhase::Stopped);
        self.publish();
    }

    /// Remember the local document; broadcast it when it probably changed.
    ///
    /// Returns whether a `scene_update` was sent.
    pub async fn sync_local_change(&mut self, snapshot: SceneSnapshot) -> bool {
        self.local_scene = snapshot;
        self.note_local_activity(Instant::now());
        if self.phase != SessionPhase::Active || !self.detector.observe(&self.local_scene) {
            return false;
        }
        let message = Message::SceneUpdate {
            snapshot: self.local_scene.clone(),
        };
        self.send(message, None).await
    }

    /// Best-effort pointer broadcast; dropped when the outbound queue is full.
    pub fn send_pointer_update(&mut self, pointer: Pointer) -> bool {
        let now = Instant::now();
        self.note_local_activity(now);
        self.registry.update_pointer(&self.identity.id, pointer, now);
        if self.phase != SessionPhase::Active {
            return false;
        }
        let (Some(channel), Some(session)) = (&self.channel, &self.session) else {
            return false;
        };
        let envelope = Envelope::broadcast(
            &session.room_id,
            self.identity.id,
            Message::PointerUpdate { pointer },
        );
        channel.try_send(envelope).is_ok()
    }

    pub async fn approve_join_request(&mut self, request_id: &Uuid) -> bool {
        self.resolve_join(request_id, Decision::Approve).await
    }

    pub async fn deny_join_request(&mut self, request_id: &Uuid) -> bool {
        self.resolve_join(request_id, Decision::Deny(DenyReason::Rejected))
            .await
    }

    /// Withdraw our own pending join request.
    pub async fn cancel_pending_approval(&mut self) -> bool {
        if self.phase != SessionPhase::AwaitingApproval {
            log::warn!("No pending join request to cancel");
            return false;
        }
        self.send_join_cancelled().await;
        self.teardown();
        log::info!("Join request cancelled");
        self.set_phase(SessionPhase::Left);
        self.publish();
        true
    }

    /// Owner only: remove `target` from the room.
    pub async fn send_kick_message(&mut self, target: Uuid) -> bool {
        if !self.is_owner() || self.phase != SessionPhase::Active {
            log::warn!("Only an active room owner can remove collaborators");
            return false;
        }
        if target == self.identity.id {
            log::warn!("Refusing to kick the local user");
            return false;
        }
        if self.registry.remove(&target).is_none() {
            log::warn!("Cannot kick unknown collaborator {target}");
            return false;
        }
        log::info!("Removing {target} from the room");
        self.emit(SessionEvent::CollaboratorLeft { id: target });
        self.send(Message::Kick { target }, None).await;
        self.publish();
        true
    }

    /// Manual retry after reconnection gave up.
    pub async fn reconnect(&mut self) -> bool {
        let retained = self.phase == SessionPhase::Stopped && self.session.is_some();
        if !retained && self.phase != SessionPhase::Reconnecting {
            log::warn!("Nothing to reconnect");
            return false;
        }
        self.supervisor.reset();
        if matches!(self.error, Some(SessionError::Exhausted { .. })) {
            self.error = None;
        }
        self.set_phase(SessionPhase::Reconnecting);
        self.attempt_reconnect().await;
        true
    }

    pub async fn set_in_call(&mut self, in_call: bool) {
        self.in_call = in_call;
        self.registry.set_in_call(&self.identity.id, in_call);
        if self.phase == SessionPhase::Active {
            self.send(self.announce(false), None).await;
        }
        self.publish();
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.publish();
    }

    // ========================================================================
    // Inbound and timing
    // ========================================================================

    /// Apply one envelope received from the relay.
    pub async fn handle_envelope(&mut self, envelope: Envelope) {
        let Some(session) = &self.session else {
            return;
        };
        if envelope.room_id != session.room_id || envelope.from == self.identity.id {
            log::debug!("Ignoring {} not meant for us", envelope.message.kind());
            return;
        }

        match self.phase {
            SessionPhase::AwaitingApproval => self.handle_pending(envelope).await,
            SessionPhase::Active => self.handle_active(envelope, Instant::now()).await,
            phase => log::debug!("Ignoring {} in phase {phase:?}", envelope.message.kind()),
        }
        self.publish();
    }

    /// The transport closed underneath us.
    pub fn on_transport_lost(&mut self) {
        self.channel = None;
        if !matches!(
            self.phase,
            SessionPhase::Active | SessionPhase::AwaitingApproval
        ) {
            return;
        }

        log::warn!("Connection to the collaboration server lost");
        self.is_offline = true;
        if self.is_owner() {
            // The relay already denied these requesters on our behalf.
            let denied = self.gate.deny_all(DenyReason::OwnerUnavailable);
            if !denied.is_empty() {
                log::info!("Dropped {} pending join requests", denied.len());
            }
        }
        match self.supervisor.connection_lost() {
            Supervision::Retry { delay, .. } => {
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_phase(SessionPhase::Reconnecting);
            }
            Supervision::Exhausted { attempts } => self.give_up(attempts),
        }
        self.publish();
    }

    /// One reconnect attempt. On success the presence announce and the full
    /// current scene are each sent exactly once.
    pub async fn attempt_reconnect(&mut self) {
        if self.phase != SessionPhase::Reconnecting {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        let hello = self.hello(session);
        let relay_url = session.relay_url.clone();
        self.reconnect_at = None;

        self.supervisor.attempt_started();
        match self.connector.connect(&relay_url, hello).await {
            Ok(channel) => {
                self.supervisor.connected();
                self.channel = Some(channel);
                log::info!("Reconnected to the collaboration server");
                let awaiting = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.join_request.is_some());
                if awaiting {
                    self.is_offline = false;
                    self.set_phase(SessionPhase::AwaitingApproval);
                } else {
                    self.activate(true).await;
                }
            }
            Err(e) if e.is_retryable() => {
                log::warn!("Reconnect attempt failed: {e}");
                match self.supervisor.attempt_failed() {
                    Supervision::Retry { delay, .. } => {
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    Supervision::Exhausted { attempts } => self.give_up(attempts),
                }
            }
            Err(e) => {
                log::warn!("Reconnect rejected: {e}");
                self.record_error(e);
                self.teardown();
                self.set_phase(SessionPhase::Stopped);
            }
        }
        self.publish();
    }

    /// When the next reconnect attempt is due.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Heartbeats, local idle detection and presence expiry.
    pub async fn tick(&mut self, now: Instant) {
        if self.phase != SessionPhase::Active {
            return;
        }

        if self.local_activity == Activity::Active
            && now.saturating_duration_since(self.last_local_activity) >= self.config.idle_after()
        {
            log::debug!("Local user went idle");
            self.local_activity = Activity::Idle;
            self.registry
                .mark_activity(&self.identity.id, Activity::Idle, now);
            self.last_heartbeat = None;
        }

        let due = self.last_heartbeat.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.config.heartbeat_interval()
        });
        if due {
            self.heartbeat_seq += 1;
            let heartbeat = Message::PresenceHeartbeat {
                identity: self.identity.clone(),
                role: self.role(),
                activity: self.local_activity,
                timestamp: self.heartbeat_seq,
            };
            self.send(heartbeat, None).await;
            self.last_heartbeat = Some(now);
        }

        let is_owner = self.is_owner();
        for gone in self.registry.expire(now) {
            log::info!("{} timed out", gone.name);
            if is_owner {
                self.gate.drop_requester(&gone.id);
            }
            self.emit(SessionEvent::CollaboratorLeft { id: gone.id });
        }
        self.publish();
    }

    /// Handle everything already buffered on the channel without waiting.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let next = match self.channel.as_mut() {
                Some(channel) => channel.try_recv(),
                None => break,
            };
            match next {
                Ok(Some(envelope)) => {
                    self.handle_envelope(envelope).await;
                    handled += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    self.on_transport_lost();
                    break;
                }
            }
        }
        handled
    }

    /// Wait for the next inbound envelope. `None` means the transport
    /// closed; never resolves while there is no channel.
    pub async fn next_inbound(&mut self) -> Option<Envelope> {
        match self.channel.as_mut() {
            Some(channel) => channel.recv().await,
            None => std::future::pending().await,
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&RoomSession> {
        self.session.as_ref()
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn join_gate(&self) -> &JoinGate {
        &self.gate
    }

    pub fn local_scene(&self) -> &SceneSnapshot {
        &self.local_scene
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn is_owner(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.role == Role::Owner)
    }

    pub fn is_offline(&self) -> bool {
        self.is_offline
    }

    pub fn is_collaborating(&self) -> bool {
        match self.phase {
            SessionPhase::Active => true,
            SessionPhase::Reconnecting => !self.awaiting_approval(),
            _ => false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            connection: self.supervisor.state(),
            is_collaborating: self.is_collaborating(),
            is_owner: self.is_owner(),
            is_offline: self.is_offline,
            is_pending_approval: self.phase == SessionPhase::AwaitingApproval
                || (self.phase == SessionPhase::Reconnecting && self.awaiting_approval()),
            error: self.error.clone(),
            error_message: self.error.as_ref().map(ToString::to_string),
            room_id: self.session.as_ref().map(|s| s.room_id.clone()),
            collaborators: self.registry.collaborators().cloned().collect(),
            pending_join_requests: self.gate.pending().cloned().collect(),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn handle_pending(&mut self, envelope: Envelope) {
        let expected = self.session.as_ref().and_then(|s| s.join_request);
        match envelope.message {
            Message::JoinApproved { request_id } if Some(request_id) == expected => {
                if let Some(session) = self.session.as_mut() {
                    session.join_request = None;
                    session.owner_id.get_or_insert(envelope.from);
                }
                log::info!("Join request approved");
                self.activate(false).await;
            }
            Message::JoinDenied { request_id, reason } if Some(request_id) == expected => {
                let error = match reason {
                    DenyReason::OwnerUnavailable => SessionError::OwnerUnavailable,
                    DenyReason::Rejected | DenyReason::RoomFull => SessionError::JoinDenied,
                };
                log::info!("Join request denied: {reason:?}");
                self.record_error(error);
                self.teardown();
                self.set_phase(SessionPhase::Left);
            }
            other => log::debug!("Ignoring {} while awaiting approval", other.kind()),
        }
    }

    async fn handle_active(&mut self, envelope: Envelope, now: Instant) {
        let from = envelope.from;
        let is_owner = self.is_owner();
        self.registry.touch(&from, now);

        match envelope.message {
            Message::JoinRequest { request_id, requester } => {
                if !is_owner || requester.id != from {
                    log::debug!("Ignoring join request from {from}");
                    return;
                }
                let pending = PendingJoinRequest::new(request_id, requester.clone(), now);
                if self.gate.submit(pending) {
                    log::info!("{} asks to join", requester.name);
                    self.emit(SessionEvent::JoinRequested { request_id, requester });
                }
            }
            Message::JoinCancelled { request_id } => {
                if is_owner && self.gate.cancel(&request_id).is_some() {
                    log::info!("Join request {request_id} withdrawn");
                }
            }
            Message::JoinApproved { .. } | Message::JoinDenied { .. } => {
                log::debug!("Ignoring late join decision from {from}");
            }
            Message::PresenceAnnounce {
                identity,
                role,
                in_call,
                resync,
            } => {
                if identity.id != from {
                    log::warn!("Announce for {} sent by {from}, ignoring", identity.id);
                    return;
                }
                let collaborator = Collaborator::remote(&identity, role, now).with_in_call(in_call);
                // A resyncing peer sends its own scene next; ours would be stale.
                self.admit(collaborator, !resync).await;
            }
            Message::PresenceHeartbeat {
                identity,
                role,
                activity,
                ..
            } => {
                if identity.id != from {
                    return;
                }
                if !self.registry.mark_activity(&from, activity, now) {
                    let collaborator = Collaborator::remote(&identity, role, now).with_activity(activity);
                    self.admit(collaborator, false).await;
                }
            }
            Message::SceneUpdate { snapshot } => {
                self.detector.set_baseline(&snapshot);
                self.local_scene = snapshot.clone();
                self.emit(SessionEvent::RemoteScene { from, snapshot });
            }
            Message::PointerUpdate { pointer } => {
                self.registry.update_pointer(&from, pointer, now);
                self.emit(SessionEvent::RemotePointer { from, pointer });
            }
            Message::Kick { target } if target == self.identity.id => {
                let owner = self.session.as_ref().and_then(|s| s.owner_id);
                if owner.is_some_and(|owner| owner != from) {
                    log::warn!("Ignoring kick from non-owner {from}");
                    return;
                }
                log::info!("Removed from the room by its owner");
                self.record_error(SessionError::Kicked);
                self.teardown();
                self.set_phase(SessionPhase::Stopped);
            }
            Message::Kick { target } => {
                if self.registry.remove(&target).is_some() {
                    self.emit(SessionEvent::CollaboratorLeft { id: target });
                }
            }
            Message::Leave { id } => {
                if id != from {
                    return;
                }
                if is_owner {
                    self.gate.drop_requester(&id);
                }
                if let Some(gone) = self.registry.remove(&id) {
                    log::info!("{} left the room", gone.name);
                    self.emit(SessionEvent::CollaboratorLeft { id });
                }
            }
        }
    }

    /// Insert or merge a remote collaborator. Newcomers get our announce
    /// so they learn about us without waiting for a heartbeat. With
    /// `hand_over`, an ungated owner also sends its scene.
    async fn admit(&mut self, collaborator: Collaborator, hand_over: bool) {
        let (id, name) = (collaborator.id, collaborator.name.clone());
        match self.registry.upsert(collaborator) {
            Upsert::Inserted => {
                log::info!("{name} joined the room");
                self.emit(SessionEvent::CollaboratorJoined { id, name });
                self.send(self.announce(false), Some(id)).await;

                // Gated rooms hand the scene over on approval instead.
                let ungated_owner = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.role == Role::Owner && !s.gated);
                if hand_over && ungated_owner && !self.local_scene.is_empty() {
                    let snapshot = self.local_scene.clone();
                    self.send(Message::SceneUpdate { snapshot }, Some(id)).await;
                }
            }
            Upsert::Rejected => log::warn!("Room is full, not tracking {name}"),
            Upsert::Updated | Upsert::Ignored => {}
        }
    }

    async fn resolve_join(&mut self, request_id: &Uuid, decision: Decision) -> bool {
        if !self.is_owner() || self.phase != SessionPhase::Active {
            log::warn!("Only an active room owner can answer join requests");
            return false;
        }
        let now = Instant::now();
        let Some(resolution) = self
            .gate
            .resolve(request_id, decision, &mut self.registry, now)
        else {
            log::warn!("Unknown join request {request_id}");
            return false;
        };

        let requester = resolution.requester_id();
        self.send(resolution.reply, Some(requester)).await;
        if resolution.decision == Decision::Approve {
            log::info!("Approved {} into the room", resolution.request.requester.name);
            self.emit(SessionEvent::CollaboratorJoined {
                id: requester,
                name: resolution.request.requester.name,
            });
            self.send(self.announce(false), Some(requester)).await;
            let snapshot = self.local_scene.clone();
            self.send(Message::SceneUpdate { snapshot }, Some(requester))
                .await;
        } else {
            log::info!("Denied join request {request_id}: {:?}", resolution.decision);
        }
        self.publish();
        true
    }

    async fn activate(&mut self, resync: bool) {
        let now = Instant::now();
        self.is_offline = false;
        self.local_activity = Activity::Active;
        self.last_local_activity = now;
        self.last_heartbeat = Some(now);
        self.set_phase(SessionPhase::Active);

        self.send(self.announce(resync), None).await;
        if resync && !self.local_scene.is_empty() {
            let snapshot = self.local_scene.clone();
            self.send(Message::SceneUpdate { snapshot }, None).await;
            self.detector.set_baseline(&self.local_scene);
        }
    }

    async fn send_join_cancelled(&self) {
        let Some(session) = &self.session else {
            return;
        };
        if let Some(request_id) = session.join_request {
            self.send(Message::JoinCancelled { request_id }, session.owner_id)
                .await;
        }
    }

    /// Queue a message on the channel. Failures are only logged: a dead
    /// transport is reported by the inbound side.
    async fn send(&self, message: Message, to: Option<Uuid>) -> bool {
        let (Some(channel), Some(session)) = (&self.channel, &self.session) else {
            return false;
        };
        let kind = message.kind();
        let envelope = match to {
            Some(to) => Envelope::direct(&session.room_id, self.identity.id, to, message),
            None => Envelope::broadcast(&session.room_id, self.identity.id, message),
        };
        match channel.send(envelope).await {
            Ok(()) => {
                log::debug!("Sent {kind}");
                true
            }
            Err(e) => {
                log::warn!("Failed to send {kind}: {e}");
                false
            }
        }
    }

    fn announce(&self, resync: bool) -> Message {
        Message::PresenceAnnounce {
            identity: self.identity.clone(),
            role: self.role(),
            in_call: self.in_call,
            resync,
        }
    }

    fn hello(&self, session: &RoomSession) -> Hello {
        let hello = Hello::new(&session.room_id, self.identity.clone(), session.role);
        match session.join_request {
            Some(request_id) => hello.with_join_request(request_id),
            None => hello,
        }
    }

    fn role(&self) -> Role {
        self.session.as_ref().map_or(Role::Member, |s| s.role)
    }

    fn awaiting_approval(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.join_request.is_some())
    }

    fn has_live_session(&self) -> bool {
        self.session.is_some()
            && !matches!(
                self.phase,
                SessionPhase::Idle | SessionPhase::Left | SessionPhase::Stopped
            )
    }

    fn note_local_activity(&mut self, now: Instant) {
        self.last_local_activity = now;
        if self.local_activity == Activity::Idle {
            self.local_activity = Activity::Active;
            self.registry
                .mark_activity(&self.identity.id, Activity::Active, now);
            // Tell the room right away on the next tick
            self.last_heartbeat = None;
        }
    }

    fn fail_start(&mut self, error: SessionError) -> SessionError {
        let error = match error {
            e @ (SessionError::RoomUnavailable(_) | SessionError::ConnectFailed(_)) => e,
            other => SessionError::ConnectFailed(other.to_string()),
        };
        log::warn!("Could not start collaboration: {error}");
        self.record_error(error.clone());
        self.set_phase(SessionPhase::Idle);
        self.publish();
        error
    }

    fn give_up(&mut self, attempts: u32) {
        log::warn!("Reconnection exhausted after {attempts} attempts");
        self.reconnect_at = None;
        self.record_error(SessionError::Exhausted { attempts });
        self.set_phase(SessionPhase::Stopped);
    }

    fn teardown(&mut self) {
        self.channel = None;
        self.session = None;
        self.registry.clear();
        self.gate.clear();
        self.detector.reset();
        self.supervisor.reset();
        self.reconnect_at = None;
        self.is_offline = false;
        self.last_heartbeat = None;
    }

    fn record_error(&mut self, error: SessionError) {
        log::warn!("Session error: {error}");
        self.error = Some(error.clone());
        self.emit(SessionEvent::Error(error));
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            log::debug!("Session phase {:?} -> {phase:?}", self.phase);
            self.phase = phase;
            self.emit(SessionEvent::PhaseChanged(phase));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MockConnector, RemoteEnd};
    use crate::directory::{MockRoomDirectory, RoomInfo};
    use crate::scene::Element;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Duration;

    const ROOM: &str = "room-42";

    fn room_info(role: Role, owner_id: Uuid, gated: bool) -> RoomInfo {
        RoomInfo {
            room_id: ROOM.into(),
            relay_url: "ws://relay".into(),
            role,
            member_count: 1,
            owner_id: Some(owner_id),
            gated,
        }
    }

    fn directory(info: RoomInfo) -> Arc<dyn RoomDirectory> {
        let mut directory = MockRoomDirectory::new();
        let created = info.clone();
        directory
            .expect_create_room()
            .returning(move |_| Ok(created.clone()));
        directory
            .expect_room_info()
            .returning(move |_, _| Ok(info.clone()));
        Arc::new(directory)
    }

    /// Connector handing out pre-built connect results in order.
    fn scripted(results: Vec<Result<SyncChannel, SessionError>>) -> Arc<dyn Connector> {
        let queue = Arc::new(Mutex::new(VecDeque::from(results)));
        let mut connector = MockConnector::new();
        connector.expect_connect().returning(move |_, _| {
            queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SessionError::ConnectFailed("no more scripted connections".into())))
        });
        Arc::new(connector)
    }

    fn kinds(sent: &[Envelope]) -> Vec<&'static str> {
        sent.iter().map(|e| e.message.kind()).collect()
    }

    fn scene(n: usize) -> SceneSnapshot {
        SceneSnapshot::new((0..n).map(|i| Element::new(format!("el-{i}"), 1)).collect())
    }

    async fn owner_session() -> (SessionController, RemoteEnd) {
        let me = Identity::new("Owner");
        let (channel, remote) = SyncChannel::memory(64);
        let mut controller = SessionController::new(
            me.clone(),
            SessionConfig::default(),
            directory(room_info(Role::Owner, me.id, true)),
            scripted(vec![Ok(channel)]),
        );
        controller.start_collaboration(None).await.unwrap();
        (controller, remote)
    }

    async fn member_session(owner: Uuid) -> (SessionController, RemoteEnd) {
        let (channel, remote) = SyncChannel::memory(64);
        let mut controller = SessionController::new(
            Identity::new("Member"),
            SessionConfig::default(),
            directory(room_info(Role::Member, owner, false)),
            scripted(vec![Ok(channel)]),
        );
        controller.start_collaboration(Some(ROOM)).await.unwrap();
        (controller, remote)
    }

    fn from_peer(peer: &Identity, message: Message) -> Envelope {
        Envelope::broadcast(ROOM, peer.id, message)
    }

    fn announce(peer: &Identity, role: Role) -> Envelope {
        from_peer(
            peer,
            Message::PresenceAnnounce {
                identity: peer.clone(),
                role,
                in_call: false,
                resync: false,
            },
        )
    }

    #[tokio::test]
    async fn test_owner_start_creates_room() {
        let (controller, mut remote) = owner_session().await;
        let view = controller.view();
        assert!(view.is_owner);
        assert!(view.is_collaborating);
        assert_eq!(view.phase, SessionPhase::Active);
        assert_eq!(view.collaborators.len(), 1);
        assert!(view.collaborators[0].is_current_user);
        assert_eq!(kinds(&remote.drain()), vec!["presence_announce"]);
    }

    #[tokio::test]
    async fn test_directory_failure_is_recorded() {
        let mut directory = MockRoomDirectory::new();
        directory
            .expect_room_info()
            .returning(|_, _| Err(SessionError::RoomUnavailable("gone".into())));
        let mut controller = SessionController::new(
            Identity::new("Bob"),
            SessionConfig::default(),
            Arc::new(directory),
            scripted(vec![]),
        );

        let result = controller.start_collaboration(Some("gone")).await;
        assert!(matches!(result, Err(SessionError::RoomUnavailable(_))));
        let view = controller.view();
        assert_eq!(view.phase, SessionPhase::Idle);
        assert!(view.error_message.is_some());
        assert!(!view.is_collaborating);
    }

    #[tokio::test]
    async fn test_connect_failure_is_terminal_on_first_connect() {
        let me = Identity::new("Owner");
        let mut controller = SessionController::new(
            me.clone(),
            SessionConfig::default(),
            directory(room_info(Role::Owner, me.id, true)),
            scripted(vec![Err(SessionError::ConnectFailed("refused".into()))]),
        );
        let result = controller.start_collaboration(None).await;
        assert!(matches!(result, Err(SessionError::ConnectFailed(_))));
        assert_eq!(controller.reconnect_deadline(), None);
        assert!(matches!(controller.error(), Some(SessionError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (mut controller, _remote) = owner_session().await;
        assert_eq!(
            controller.start_collaboration(None).await,
            Err(SessionError::AlreadyActive)
        );
        assert_eq!(controller.phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut controller, mut remote) = owner_session().await;
        remote.drain();

        controller.stop_session().await;
        let after_first = controller.view();
        controller.stop_session().await;
        assert_eq!(controller.view(), after_first);

        assert_eq!(after_first.phase, SessionPhase::Stopped);
        assert!(after_first.collaborators.is_empty());
        assert!(after_first.room_id.is_none());
        assert_eq!(kinds(&remote.drain()), vec!["leave"]);
    }

    #[tokio::test]
    async fn test_owner_transport_loss_clears_queued_requests() {
        let (mut controller, remote) = owner_session().await;
        let bob = Identity::new("Bob");
        let owner_id = controller.identity().id;
        controller
            .handle_envelope(Envelope::direct(
                ROOM,
                bob.id,
                owner_id,
                Message::JoinRequest { request_id: Uuid::new_v4(), requester: bob.clone() },
            ))
            .await;
        assert_eq!(controller.join_gate().len(), 1);

        drop(remote);
        controller.process_pending().await;
        assert_eq!(controller.phase(), SessionPhase::Reconnecting);
        assert!(controller.join_gate().is_empty());
        assert!(controller.view().pending_join_requests.is_empty());
        assert!(!controller.registry().contains(&bob.id));
    }

    #[tokio::test]
    async fn test_owner_stop_denies_queued_requests() {
        let (mut controller, mut remote) = owner_session().await;
        let bob = Identity::new("Bob");
        let owner_id = controller.identity().id;
        controller
            .handle_envelope(Envelope::direct(
                ROOM,
                bob.id,
                owner_id,
                Message::JoinRequest { request_id: Uuid::new_v4(), requester: bob.clone() },
            ))
            .await;
        assert_eq!(controller.view().pending_join_requests.len(), 1);
        remote.drain();

        controller.stop_session().await;
        let sent = remote.drain();
        assert_eq!(kinds(&sent), vec!["join_denied", "leave"]);
        assert_eq!(sent[0].to, Some(bob.id));
        assert!(matches!(
            sent[0].message,
            Message::JoinDenied { reason: DenyReason::OwnerUnavailable, .. }
        ));
    }

    #[tokio::test]
    async fn test_change_detection_gates_broadcast() {
        let (mut controller, mut remote) = owner_session().await;
        remote.drain();

        assert!(controller.sync_local_change(scene(5)).await);
        assert!(!controller.sync_local_change(scene(5)).await);
        assert!(controller.sync_local_change(scene(6)).await);

        // In-place edit of a middle element goes unnoticed.
        let mut edited = scene(6);
        edited.elements[3].payload = vec![1];
        assert!(!controller.sync_local_change(edited).await);

        assert_eq!(kinds(&remote.drain()), vec!["scene_update", "scene_update"]);
    }

    #[tokio::test]
    async fn test_remote_scene_is_not_echoed() {
        let (mut controller, mut remote) = owner_session().await;
        let mut events = controller.subscribe();
        let peer = Identity::new("Peer");
        controller.handle_envelope(announce(&peer, Role::Member)).await;
        remote.drain();

        controller
            .handle_envelope(from_peer(&peer, Message::SceneUpdate { snapshot: scene(3) }))
            .await;
        assert_eq!(controller.local_scene(), &scene(3));
        assert!(!controller.sync_local_change(scene(3)).await);
        assert!(remote.drain().is_empty());

        let mut saw_scene = false;
        while let Ok(event) = events.try_recv() {
            saw_scene |= matches!(event, SessionEvent::RemoteScene { from, .. } if from == peer.id);
        }
        assert!(saw_scene);
    }

    #[tokio::test]
    async fn test_announce_from_newcomer_gets_reply() {
        let (mut controller, mut remote) = owner_session().await;
        remote.drain();
        let peer = Identity::new("Peer");

        controller.handle_envelope(announce(&peer, Role::Member)).await;
        controller.handle_envelope(announce(&peer, Role::Member)).await;

        let sent = remote.drain();
        assert_eq!(kinds(&sent), vec!["presence_announce"]);
        assert_eq!(sent[0].to, Some(peer.id));
        assert_eq!(controller.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_ungated_owner_hands_scene_only_to_newcomers() {
        let me = Identity::new("Owner");
        let (channel, mut remote) = SyncChannel::memory(32);
        let mut controller = SessionController::new(
            me.clone(),
            SessionConfig::default(),
            directory(room_info(Role::Owner, me.id, false)),
            scripted(vec![Ok(channel)]),
        );
        controller.start_collaboration(None).await.unwrap();
        controller.sync_local_change(scene(3)).await;
        remote.drain();

        let newcomer = Identity::new("New");
        controller.handle_envelope(announce(&newcomer, Role::Member)).await;
        assert_eq!(kinds(&remote.drain()), vec!["presence_announce", "scene_update"]);

        let returning = Identity::new("Back");
        let resync = Message::PresenceAnnounce {
            identity: returning.clone(),
            role: Role::Member,
            in_call: false,
            resync: true,
        };
        controller.handle_envelope(from_peer(&returning, resync)).await;
        assert_eq!(kinds(&remote.drain()), vec!["presence_announce"]);
        assert!(controller.registry().contains(&returning.id));
    }

    #[tokio::test]
    async fn test_non_owner_cannot_approve_or_kick() {
        let owner = Identity::new("Owner");
        let (mut member, mut remote) = member_session(owner.id).await;
        let peer = Identity::new("Peer");
        member.handle_envelope(announce(&peer, Role::Member)).await;
        member
            .handle_envelope(from_peer(
                &peer,
                Message::JoinRequest { request_id: Uuid::new_v4(), requester: peer.clone() },
            ))
            .await;
        remote.drain();

        assert!(member.view().pending_join_requests.is_empty());
        assert!(!member.approve_join_request(&Uuid::new_v4()).await);
        assert!(!member.deny_join_request(&Uuid::new_v4()).await);
        assert!(!member.send_kick_message(peer.id).await);
        assert!(remote.drain().is_empty());
        assert!(member.registry().contains(&peer.id));
    }

    #[tokio::test]
    async fn test_unknown_request_id_is_noop() {
        let (mut controller, mut remote) = owner_session().await;
        remote.drain();
        assert!(!controller.approve_join_request(&Uuid::new_v4()).await);
        assert!(remote.drain().is_empty());
    }

    #[tokio::test]
    async fn test_approve_sends_decision_and_scene() {
        let (mut controller, mut remote) = owner_session().await;
        controller.sync_local_change(scene(2)).await;
        let bob = Identity::new("Bob");
        let request_id = Uuid::new_v4();
        controller
            .handle_envelope(from_peer(&bob, Message::JoinRequest { request_id, requester: bob.clone() }))
            .await;
        remote.drain();

        assert!(controller.approve_join_request(&request_id).await);
        let sent = remote.drain();
        assert_eq!(kinds(&sent), vec!["join_approved", "presence_announce", "scene_update"]);
        assert!(sent.iter().all(|e| e.to == Some(bob.id)));
        assert!(controller.registry().contains(&bob.id));
        assert!(controller.view().pending_join_requests.is_empty());
    }

    #[tokio::test]
    async fn test_kick_removes_and_broadcasts() {
        let (mut controller, mut remote) = owner_session().await;
        let peer = Identity::new("Peer");
        controller.handle_envelope(announce(&peer, Role::Member)).await;
        remote.drain();

        assert!(controller.send_kick_message(peer.id).await);
        assert!(!controller.registry().contains(&peer.id));
        let sent = remote.drain();
        assert_eq!(sent[0].message, Message::Kick { target: peer.id });
        assert_eq!(sent[0].to, None);
    }

    #[tokio::test]
    async fn test_kicked_member_stops_with_error() {
        let owner = Identity::new("Owner");
        let (mut member, _remote) = member_session(owner.id).await;
        let me = member.identity().id;

        member
            .handle_envelope(from_peer(&owner, Message::Kick { target: me }))
            .await;
        let view = member.view();
        assert_eq!(view.phase, SessionPhase::Stopped);
        assert!(!view.is_collaborating);
        assert_eq!(view.error, Some(SessionError::Kicked));
        assert!(view.error_message.unwrap().contains("removed"));

        member.clear_error();
        assert!(member.view().error_message.is_none());
    }

    #[tokio::test]
    async fn test_kick_from_non_owner_is_ignored() {
        let owner = Identity::new("Owner");
        let (mut member, _remote) = member_session(owner.id).await;
        let me = member.identity().id;
        let mallory = Identity::new("Mallory");

        member
            .handle_envelope(from_peer(&mallory, Message::Kick { target: me }))
            .await;
        assert_eq!(member.phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn test_pending_requester_flow() {
        let owner = Identity::new("Owner");
        let (channel, mut remote) = SyncChannel::memory(16);
        let mut requester = SessionController::new(
            Identity::new("Bob"),
            SessionConfig::default(),
            directory(room_info(Role::Member, owner.id, true)),
            scripted(vec![Ok(channel)]),
        );
        requester.start_collaboration(Some(ROOM)).await.unwrap();
        assert!(requester.view().is_pending_approval);
        assert!(remote.drain().is_empty());

        let request_id = requester.session().unwrap().join_request.unwrap();
        // A scene before approval is ignored.
        remote
            .inbound
            .send(from_peer(&owner, Message::SceneUpdate { snapshot: scene(1) }))
            .await
            .unwrap();
        remote
            .inbound
            .send(from_peer(&owner, Message::JoinApproved { request_id }))
            .await
            .unwrap();
        assert_eq!(requester.process_pending().await, 2);

        assert_eq!(requester.phase(), SessionPhase::Active);
        assert!(requester.local_scene().is_empty());
        assert_eq!(kinds(&remote.drain()), vec!["presence_announce"]);
    }

    #[tokio::test]
    async fn test_cancel_pending_approval_ignores_late_decision() {
        let owner = Identity::new("Owner");
        let (channel, mut remote) = SyncChannel::memory(16);
        let mut requester = SessionController::new(
            Identity::new("Bob"),
            SessionConfig::default(),
            directory(room_info(Role::Member, owner.id, true)),
            scripted(vec![Ok(channel)]),
        );
        requester.start_collaboration(Some(ROOM)).await.unwrap();
        let request_id = requester.session().unwrap().join_request.unwrap();

        assert!(requester.cancel_pending_approval().await);
        let sent = remote.drain();
        assert_eq!(sent[0].message, Message::JoinCancelled { request_id });
        assert_eq!(sent[0].to, Some(owner.id));
        assert_eq!(requester.phase(), SessionPhase::Left);

        requester
            .handle_envelope(from_peer(&owner, Message::JoinApproved { request_id }))
            .await;
        assert_eq!(requester.phase(), SessionPhase::Left);
        assert!(!requester.cancel_pending_approval().await);
    }

    #[tokio::test]
    async fn test_denied_request_leaves_with_error() {
        let owner = Identity::new("Owner");
        let (channel, mut remote) = SyncChannel::memory(16);
        let mut requester = SessionController::new(
            Identity::new("Bob"),
            SessionConfig::default(),
            directory(room_info(Role::Member, owner.id, true)),
            scripted(vec![Ok(channel)]),
        );
        requester.start_collaboration(Some(ROOM)).await.unwrap();
        let request_id = requester.session().unwrap().join_request.unwrap();

        remote
            .inbound
            .send(from_peer(
                &owner,
                Message::JoinDenied { request_id, reason: DenyReason::OwnerUnavailable },
            ))
            .await
            .unwrap();
        requester.process_pending().await;
        assert_eq!(requester.phase(), SessionPhase::Left);
        assert_eq!(requester.error(), Some(&SessionError::OwnerUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_timeout_boundary() {
        let (mut controller, _remote) = owner_session().await;
        let peer = Identity::new("Ghost");
        controller.handle_envelope(announce(&peer, Role::Member)).await;
        let seen = Instant::now();
        let timeout = controller.config().presence_timeout();

        controller.tick(seen + timeout).await;
        assert!(controller.registry().contains(&peer.id));

        controller.tick(seen + timeout + Duration::from_millis(1)).await;
        assert!(!controller.registry().contains(&peer.id));
        assert_eq!(controller.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sends_heartbeats_and_goes_idle() {
        let (mut controller, mut remote) = owner_session().await;
        remote.drain();
        let start = Instant::now();
        let config = controller.config().clone();

        controller.tick(start + Duration::from_secs(1)).await;
        assert!(remote.drain().is_empty());

        controller.tick(start + config.heartbeat_interval()).await;
        let sent = remote.drain();
        assert!(matches!(
            sent[0].message,
            Message::PresenceHeartbeat { activity: Activity::Active, timestamp: 1, .. }
        ));

        controller.tick(start + config.idle_after()).await;
        let sent = remote.drain();
        assert!(matches!(
            sent[0].message,
            Message::PresenceHeartbeat { activity: Activity::Idle, timestamp: 2, .. }
        ));
        assert_eq!(
            controller.registry().current_user().unwrap().activity,
            Activity::Idle
        );
    }

    #[tokio::test]
    async fn test_reconnect_resends_announce_and_scene_once() {
        let me = Identity::new("Owner");
        let (first, first_remote) = SyncChannel::memory(64);
        let (second, mut second_remote) = SyncChannel::memory(64);
        let mut controller = SessionController::new(
            me.clone(),
            SessionConfig::default(),
            directory(room_info(Role::Owner, me.id, true)),
            scripted(vec![
                Ok(first),
                Err(SessionError::ConnectFailed("down".into())),
                Err(SessionError::ConnectFailed("down".into())),
                Ok(second),
            ]),
        );
        controller.start_collaboration(None).await.unwrap();
        controller.sync_local_change(scene(4)).await;

        drop(first_remote);
        controller.process_pending().await;
        assert_eq!(controller.phase(), SessionPhase::Reconnecting);
        assert!(controller.view().is_offline);
        assert!(controller.reconnect_deadline().is_some());

        // Offline edits are not queued.
        assert!(!controller.sync_local_change(scene(5)).await);

        controller.attempt_reconnect().await;
        controller.attempt_reconnect().await;
        assert_eq!(controller.phase(), SessionPhase::Reconnecting);
        controller.attempt_reconnect().await;
        assert_eq!(controller.phase(), SessionPhase::Active);
        assert!(!controller.view().is_offline);

        let sent = second_remote.drain();
        assert_eq!(kinds(&sent), vec!["presence_announce", "scene_update"]);
        assert_eq!(sent[1].message, Message::SceneUpdate { snapshot: scene(5) });
        assert!(matches!(
            sent[0].message,
            Message::PresenceAnnounce { resync: true, .. }
        ));
        // The resync counts as the last broadcast.
        assert!(!controller.sync_local_change(scene(5)).await);
    }

    #[tokio::test]
    async fn test_exhaustion_then_manual_reconnect() {
        let me = Identity::new("Owner");
        let (first, first_remote) = SyncChannel::memory(8);
        let (second, _second_remote) = SyncChannel::memory(8);
        let config = SessionConfig {
            reconnect_max_attempts: 1,
            ..SessionConfig::default()
        };
        let mut controller = SessionController::new(
            me.clone(),
            config,
            directory(room_info(Role::Owner, me.id, true)),
            scripted(vec![
                Ok(first),
                Err(SessionError::ConnectFailed("down".into())),
                Ok(second),
            ]),
        );
        controller.start_collaboration(None).await.unwrap();

        drop(first_remote);
        controller.process_pending().await;
        controller.attempt_reconnect().await;
        assert_eq!(controller.phase(), SessionPhase::Stopped);
        assert_eq!(controller.error(), Some(&SessionError::Exhausted { attempts: 1 }));
        assert!(controller.session().is_some());

        assert!(controller.reconnect().await);
        assert_eq!(controller.phase(), SessionPhase::Active);
        assert!(controller.error().is_none());
    }

    #[tokio::test]
    async fn test_pointer_updates_skip_change_detection() {
        let (mut controller, mut remote) = owner_session().await;
        remote.drain();
        assert!(controller.send_pointer_update(Pointer::new(1.0, 1.0)));
        assert!(controller.send_pointer_update(Pointer::new(1.0, 1.0)));
        assert_eq!(kinds(&remote.drain()), vec!["pointer_update", "pointer_update"]);
    }

    #[tokio::test]
    async fn test_watch_reflects_view() {
        let (mut controller, _remote) = owner_session().await;
        let watch = controller.watch();
        assert_eq!(watch.borrow().phase, SessionPhase::Active);
        controller.set_in_call(true).await;
        assert!(watch.borrow().collaborators[0].in_call);
    }
}
