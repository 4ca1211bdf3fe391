//! Collaborator presence for the active room.
//!
//! ## Architecture
//!
//! ```text
//! presence_announce / heartbeat / pointer_update
//!       │
//!       ▼
//! PresenceRegistry::upsert() / touch() / update_pointer()
//!       │
//!       ▼
//! IndexMap<id, Collaborator>   (join order, stable for UI lists)
//!       │
//!       ▼   every tick
//! PresenceRegistry::expire()   (drops ghosts after the timeout)
//! ```
//!
//! The registry is owned by the session controller; nothing else mutates
//! it. Exactly one entry is the current user while a session is active.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::scene::Pointer;

/// Authenticated participant identity handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            avatar: None,
        }
    }

    /// Create with explicit id (for testing)
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    #[default]
    Active,
    Idle,
}

/// A known participant of the room, local or remote.
#[derive(Debug, Clone, PartialEq)]
pub struct Collaborator {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub activity: Activity,
    pub in_call: bool,
    pub is_current_user: bool,
    pub pointer: Option<Pointer>,
    pub last_seen: Instant,
}

impl Collaborator {
    /// A remote collaborator freshly seen at `now`.
    pub fn remote(identity: &Identity, role: Role, now: Instant) -> Self {
        Self {
            id: identity.id,
            name: identity.name.clone(),
            avatar: identity.avatar.clone(),
            role,
            activity: Activity::Active,
            in_call: false,
            is_current_user: false,
            pointer: None,
            last_seen: now,
        }
    }

    pub fn with_in_call(mut self, in_call: bool) -> Self {
        self.in_call = in_call;
        self
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity = activity;
        self
    }

    /// Whether nothing has been heard from this collaborator for longer than `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Result of [`PresenceRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    /// The registry is at capacity and the id is new.
    Rejected,
    /// Remote update targeting the local user; ignored.
    Ignored,
}

/// Insertion-ordered set of collaborators for one room.
pub struct PresenceRegistry {
    entries: IndexMap<Uuid, Collaborator>,
    current_user: Option<Uuid>,
    capacity: usize,
    timeout: Duration,
}

impl PresenceRegistry {
    /// An empty registry (no session).
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            current_user: None,
            capacity: capacity.max(1),
            timeout,
        }
    }

    /// A registry seeded with the local user as its first entry.
    pub fn with_current_user(
        identity: &Identity,
        role: Role,
        capacity: usize,
        timeout: Duration,
        now: Instant,
    ) -> Self {
        let mut registry = Self::new(capacity, timeout);
        registry.reset_current_user(identity, role, now);
        registry
    }

    /// Clear everything and insert the local user.
    pub fn reset_current_user(&mut self, identity: &Identity, role: Role, now: Instant) {
        self.entries.clear();
        let mut me = Collaborator::remote(identity, role, now);
        me.is_current_user = true;
        self.entries.insert(identity.id, me);
        self.current_user = Some(identity.id);
    }

    /// Insert or merge by id. Never creates a duplicate entry.
    pub fn upsert(&mut self, collaborator: Collaborator) -> Upsert {
        if Some(collaborator.id) == self.current_user {
            return Upsert::Ignored;
        }

        if let Some(existing) = self.entries.get_mut(&collaborator.id) {
            existing.name = collaborator.name;
            existing.avatar = collaborator.avatar;
            existing.role = collaborator.role;
            existing.activity = collaborator.activity;
            existing.in_call = collaborator.in_call;
            if collaborator.pointer.is_some() {
                existing.pointer = collaborator.pointer;
            }
            existing.last_seen = existing.last_seen.max(collaborator.last_seen);
            return Upsert::Updated;
        }

        if self.is_full() {
            log::warn!(
                "Presence registry full ({} entries), ignoring {}",
                self.capacity,
                collaborator.id
            );
            return Upsert::Rejected;
        }

        let mut collaborator = collaborator;
        collaborator.is_current_user = false;
        self.entries.insert(collaborator.id, collaborator);
        Upsert::Inserted
    }

    /// Remove a remote collaborator. The local user is never removed here.
    pub fn remove(&mut self, id: &Uuid) -> Option<Collaborator> {
        if Some(*id) == self.current_user {
            return None;
        }
        // shift_remove keeps the remaining join order intact
        self.entries.shift_remove(id)
    }

    /// Update the activity state. Purely observational.
    pub fn mark_activity(&mut self, id: &Uuid, activity: Activity, now: Instant) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.activity = activity;
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Refresh last-seen for any message received from `id`.
    pub fn touch(&mut self, id: &Uuid, now: Instant) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Pointer movement implies activity.
    pub fn update_pointer(&mut self, id: &Uuid, pointer: Pointer, now: Instant) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.pointer = Some(pointer);
                entry.activity = Activity::Active;
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn set_in_call(&mut self, id: &Uuid, in_call: bool) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.in_call = in_call;
                true
            }
            None => false,
        }
    }

    /// Remove collaborators that have gone silent. Returns the removed entries.
    pub fn expire(&mut self, now: Instant) -> Vec<Collaborator> {
        let timeout = self.timeout;
        let current = self.current_user;
        let stale: Vec<Uuid> = self
            .entries
            .values()
            .filter(|c| Some(c.id) != current && c.is_stale(now, timeout))
            .map(|c| c.id)
            .collect();

        stale
            .iter()
            .filter_map(|id| self.entries.shift_remove(id))
            .collect()
    }

    /// Drop every entry, the local user included.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_user = None;
    }

    /// Collaborators in join order.
    pub fn collaborators(&self) -> impl Iterator<Item = &Collaborator> {
        self.entries.values()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Collaborator> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn current_user(&self) -> Option<&Collaborator> {
        self.current_user.and_then(|id| self.entries.get(&id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ===================================================================
// Tests
// ===================================================================
