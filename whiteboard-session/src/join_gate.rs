//! Owner-side queue of join requests awaiting a decision.
//!
//! Requests surface one at a time in arrival order. Resolving the head
//! automatically exposes the next one. The requester never talks to this
//! type; it only receives the resulting approve/deny message.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::Instant;
use uuid::Uuid;

use crate::presence::{Collaborator, Identity, PresenceRegistry, Role, Upsert};
use crate::protocol::Message;

/// Why a join request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The owner explicitly declined.
    Rejected,
    /// The owner left or lost its connection while the request was queued.
    OwnerUnavailable,
    /// The room has reached its collaborator cap.
    RoomFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny(DenyReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingJoinRequest {
    pub request_id: Uuid,
    pub requester: Identity,
    pub requested_at: Instant,
}

impl PendingJoinRequest {
    pub fn new(request_id: Uuid, requester: Identity, requested_at: Instant) -> Self {
        Self {
            request_id,
            requester,
            requested_at,
        }
    }
}

/// Outcome of [`JoinGate::resolve`]: the removed request and the reply to
/// address to the requester.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub request: PendingJoinRequest,
    pub decision: Decision,
    pub reply: Message,
}

impl Resolution {
    fn new(request: PendingJoinRequest, decision: Decision) -> Self {
        let reply = match decision {
            Decision::Approve => Message::JoinApproved {
                request_id: request.request_id,
            },
            Decision::Deny(reason) => Message::JoinDenied {
                request_id: request.request_id,
                reason,
            },
        };
        Self {
            request,
            decision,
            reply,
        }
    }

    /// Participant the reply must be delivered to.
    pub fn requester_id(&self) -> Uuid {
        self.request.requester.id
    }
}

#[derive(Debug, Default)]
pub struct JoinGate {
    queue: VecDeque<PendingJoinRequest>,
}

impl JoinGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request unless the same requester is already waiting.
    pub fn submit(&mut self, request: PendingJoinRequest) -> bool {
        if self
            .queue
            .iter()
            .any(|queued| queued.requester.id == request.requester.id)
        {
            log::debug!(
                "Join request from {} already queued, ignoring duplicate",
                request.requester.id
            );
            return false;
        }
        self.queue.push_back(request);
        true
    }

    /// The request currently presented to the owner.
    pub fn current(&self) -> Option<&PendingJoinRequest> {
        self.queue.front()
    }

    /// All waiting requests, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingJoinRequest> {
        self.queue.iter()
    }

    /// Remove a request and produce the reply. Approval admits the
    /// requester into `registry`.
    pub fn resolve(
        &mut self,
        request_id: &Uuid,
        decision: Decision,
        registry: &mut PresenceRegistry,
        now: Instant,
    ) -> Option<Resolution> {
        let request = self.take(|r| r.request_id == *request_id)?;

        let decision = match decision {
            Decision::Approve => {
                let member = Collaborator::remote(&request.requester, Role::Member, now);
                match registry.upsert(member) {
                    Upsert::Rejected => Decision::Deny(DenyReason::RoomFull),
                    _ => Decision::Approve,
                }
            }
            deny => deny,
        };

        Some(Resolution::new(request, decision))
    }

    /// The requester withdrew its request.
    pub fn cancel(&mut self, request_id: &Uuid) -> Option<PendingJoinRequest> {
        self.take(|r| r.request_id == *request_id)
    }

    /// The requester disconnected; no decision is sent.
    pub fn drop_requester(&mut self, requester_id: &Uuid) -> Option<PendingJoinRequest> {
        self.take(|r| r.requester.id == *requester_id)
    }

    /// Deny every queued request, e.g. because the owner is leaving.
    pub fn deny_all(&mut self, reason: DenyReason) -> Vec<Resolution> {
        self.queue
            .drain(..)
            .map(|request| Resolution::new(request, Decision::Deny(reason)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn take(&mut self, pred: impl Fn(&PendingJoinRequest) -> bool) -> Option<PendingJoinRequest> {
        let index = self.queue.iter().position(pred)?;
        self.queue.remove(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn request(name: &str) -> PendingJoinRequest {
        PendingJoinRequest::new(Uuid::new_v4(), Identity::new(name), Instant::now())
    }

    fn owner_registry() -> PresenceRegistry {
        PresenceRegistry::with_current_user(
            &Identity::new("Owner"),
            Role::Owner,
            50,
            Duration::from_secs(30),
            Instant::now(),
        )
    }

    #[test]
    fn test_fifo_order() {
        let mut gate = JoinGate::new();
        let mut registry = owner_registry();
        let (a, b, c) = (request("A"), request("B"), request("C"));
        gate.submit(a.clone());
        gate.submit(b.clone());
        gate.submit(c.clone());

        assert_eq!(gate.current().unwrap().requester.name, "A");

        let denied = gate
            .resolve(&a.request_id, Decision::Deny(DenyReason::Rejected), &mut registry, Instant::now())
            .unwrap();
        assert_eq!(denied.requester_id(), a.requester.id);
        assert_eq!(gate.current().unwrap().requester.name, "B");

        let names: Vec<&str> = gate.pending().map(|r| r.requester.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_dedupe_by_requester() {
        let mut gate = JoinGate::new();
        let first = request("A");
        let mut again = request("A");
        again.requester = first.requester.clone();

        assert!(gate.submit(first));
        assert!(!gate.submit(again));
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_approve_admits_into_registry() {
        let mut gate = JoinGate::new();
        let mut registry = owner_registry();
        let req = request("Bob");
        gate.submit(req.clone());

        let resolution = gate
            .resolve(&req.request_id, Decision::Approve, &mut registry, Instant::now())
            .unwrap();
        assert_eq!(resolution.decision, Decision::Approve);
        assert!(matches!(
            resolution.reply,
            Message::JoinApproved { request_id } if request_id == req.request_id
        ));
        let admitted = registry.get(&req.requester.id).unwrap();
        assert_eq!(admitted.role, Role::Member);
        assert!(gate.is_empty());
    }

    #[test]
    fn test_deny_does_not_admit() {
        let mut gate = JoinGate::new();
        let mut registry = owner_registry();
        let req = request("Eve");
        gate.submit(req.clone());

        let resolution = gate
            .resolve(&req.request_id, Decision::Deny(DenyReason::Rejected), &mut registry, Instant::now())
            .unwrap();
        assert!(matches!(
            resolution.reply,
            Message::JoinDenied { reason: DenyReason::Rejected, .. }
        ));
        assert!(!registry.contains(&req.requester.id));
    }

    #[test]
    fn test_approve_into_full_room_becomes_denial() {
        let mut gate = JoinGate::new();
        let mut registry = PresenceRegistry::with_current_user(
            &Identity::new("Owner"),
            Role::Owner,
            1,
            Duration::from_secs(30),
            Instant::now(),
        );
        let req = request("Late");
        gate.submit(req.clone());

        let resolution = gate
            .resolve(&req.request_id, Decision::Approve, &mut registry, Instant::now())
            .unwrap();
        assert_eq!(resolution.decision, Decision::Deny(DenyReason::RoomFull));
    }

    #[test]
    fn test_unknown_id_resolves_to_none() {
        let mut gate = JoinGate::new();
        let mut registry = owner_registry();
        gate.submit(request("A"));
        assert!(gate
            .resolve(&Uuid::new_v4(), Decision::Approve, &mut registry, Instant::now())
            .is_none());
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_cancel_and_disconnect() {
        let mut gate = JoinGate::new();
        let (a, b) = (request("A"), request("B"));
        gate.submit(a.clone());
        gate.submit(b.clone());

        assert_eq!(gate.cancel(&a.request_id).unwrap().requester.name, "A");
        assert_eq!(gate.drop_requester(&b.requester.id).unwrap().requester.name, "B");
        assert!(gate.is_empty());
        assert!(gate.cancel(&a.request_id).is_none());
    }

    #[test]
    fn test_deny_all_owner_unavailable() {
        let mut gate = JoinGate::new();
        gate.submit(request("A"));
        gate.submit(request("B"));

        let denied = gate.deny_all(DenyReason::OwnerUnavailable);
        assert_eq!(denied.len(), 2);
        assert!(denied
            .iter()
            .all(|r| r.decision == Decision::Deny(DenyReason::OwnerUnavailable)));
        assert_eq!(denied[0].request.requester.name, "A");
        assert!(gate.is_empty());
    }
}
