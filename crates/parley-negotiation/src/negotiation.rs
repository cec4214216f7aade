//! The pending chat-request table.

use std::collections::HashMap;
use std::time::Instant;

use parley_protocol::{Identity, Message, MessageKind};
use parley_session::SessionRegistry;

use crate::{NegotiationConfig, NegotiationError};

/// One outstanding chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChatRequest {
    pub initiator: Identity,
    pub target: Identity,
    pub created_at: Instant,
}

/// What happened when a request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Whether the responder accepted.
    pub accepted: bool,
    /// Whether the initiator was still online to receive the notice.
    /// A notice for an offline initiator is dropped, not queued.
    pub notified: bool,
}

/// Unordered pair key: `(min, max)`. Enforces "at most one request per
/// pair" regardless of who asked first.
type PairKey = (Identity, Identity);

fn pair(a: Identity, b: Identity) -> PairKey {
    if a <= b { (a, b) } else { (b, a) }
}

/// Mediates chat requests between identities.
///
/// The table does not own sessions; every operation that needs to reach a
/// connection borrows the [`SessionRegistry`]. The server keeps both
/// behind the same lock, so a lookup and the table update it guards
/// happen atomically.
pub struct ChatNegotiation {
    pending: HashMap<PairKey, PendingChatRequest>,
    config: NegotiationConfig,
}

impl ChatNegotiation {
    /// Creates an empty table.
    pub fn new(config: NegotiationConfig) -> Self {
        Self {
            pending: HashMap::new(),
            config,
        }
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Opens a request from `initiator` to `target` and forwards a C_C
    /// notice (sender = `initiator`) to the target's connection.
    ///
    /// # Errors
    /// - [`NegotiationError::SelfRequest`] if both are the same identity
    /// - [`NegotiationError::TargetOffline`] if the target has no session;
    ///   no request is recorded
    /// - [`NegotiationError::AlreadyPending`] if the pair already has a
    ///   live request in either direction
    pub fn open_request(
        &mut self,
        sessions: &SessionRegistry,
        initiator: Identity,
        target: Identity,
        now: Instant,
    ) -> Result<(), NegotiationError> {
        if initiator == target {
            return Err(NegotiationError::SelfRequest(initiator));
        }
        let target_conn = sessions
            .lookup(target)
            .map_err(|_| NegotiationError::TargetOffline(target))?;

        let key = pair(initiator, target);
        if let Some(existing) = self.pending.get(&key) {
            if !self.is_expired(existing, now) {
                return Err(NegotiationError::AlreadyPending {
                    initiator: existing.initiator,
                    target: existing.target,
                });
            }
        }

        self.pending.insert(
            key,
            PendingChatRequest {
                initiator,
                target,
                created_at: now,
            },
        );
        target_conn.deliver(Message::new(
            MessageKind::ChatConnect,
            initiator,
            target,
            format!("Chat request from {initiator}"),
        ));

        tracing::info!(%initiator, %target, "chat request opened");
        Ok(())
    }

    /// Resolves the request `initiator → responder` and forwards a C_A or
    /// C_D notice (sender = `responder`) to the initiator if still online.
    ///
    /// # Errors
    /// [`NegotiationError::NoSuchRequest`] if no live request matches. An
    /// expired request counts as absent and is removed.
    pub fn resolve(
        &mut self,
        sessions: &SessionRegistry,
        responder: Identity,
        initiator: Identity,
        accepted: bool,
        now: Instant,
    ) -> Result<Resolution, NegotiationError> {
        let key = pair(initiator, responder);
        let no_such = NegotiationError::NoSuchRequest {
            initiator,
            responder,
        };

        let request = match self.pending.get(&key) {
            Some(req) if req.initiator == initiator && req.target == responder => req,
            _ => return Err(no_such),
        };
        if self.is_expired(request, now) {
            self.pending.remove(&key);
            return Err(no_such);
        }
        self.pending.remove(&key);

        let (kind, verb) = if accepted {
            (MessageKind::ChatAccept, "accepted")
        } else {
            (MessageKind::ChatDeny, "denied")
        };
        let notified = match sessions.lookup(initiator) {
            Ok(conn) => conn.deliver(Message::new(
                kind,
                responder,
                initiator,
                format!("Chat request {verb} by {responder}"),
            )),
            Err(_) => false,
        };

        tracing::info!(%initiator, %responder, accepted, notified, "chat request resolved");
        Ok(Resolution { accepted, notified })
    }

    /// Removes every request older than the configured TTL and returns
    /// them. Does nothing when expiry is disabled.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<PendingChatRequest> {
        if !self.config.expires() {
            return Vec::new();
        }
        let ttl = self.config.request_ttl;
        let mut expired = Vec::new();
        self.pending.retain(|_, req| {
            let keep = now.saturating_duration_since(req.created_at) <= ttl;
            if !keep {
                expired.push(req.clone());
            }
            keep
        });
        for req in &expired {
            tracing::info!(
                initiator = %req.initiator,
                target = %req.target,
                "chat request expired"
            );
        }
        expired
    }

    /// Removes every request opened by `initiator`. Called when that
    /// identity disconnects or logs out. Returns how many were removed.
    ///
    /// Requests *targeting* the identity are kept: the target may log
    /// back in and still answer.
    pub fn drop_initiator(&mut self, initiator: Identity) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, req| req.initiator != initiator);
        let removed = before - self.pending.len();
        if removed > 0 {
            tracing::debug!(%initiator, removed, "dropped chat requests of departed initiator");
        }
        removed
    }

    /// Returns the request between `a` and `b` (either direction), if any.
    pub fn pending_between(&self, a: Identity, b: Identity) -> Option<&PendingChatRequest> {
        self.pending.get(&pair(a, b))
    }

    /// Returns the number of outstanding requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_expired(&self, req: &PendingChatRequest, now: Instant) -> bool {
        self.config.expires()
            && now.saturating_duration_since(req.created_at) > self.config.request_ttl
    }
}

impl Default for ChatNegotiation {
    fn default() -> Self {
        Self::new(NegotiationConfig::default())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_session::{ConnectionHandle, Outbound, OutboundReceiver};
    use parley_transport::ConnectionId;

    use super::*;

    fn id(n: u64) -> Identity {
        Identity(n)
    }

    /// Registers `n` on a fresh handle and returns its queue.
    fn online(sessions: &mut SessionRegistry, n: u64) -> OutboundReceiver {
        let (handle, rx) = ConnectionHandle::new(ConnectionId::new(n));
        sessions.register(id(n), handle);
        rx
    }

    fn next_frame(rx: &mut OutboundReceiver) -> Message {
        match rx.try_recv() {
            Ok(Outbound::Frame(msg)) => msg,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    // =====================================================================
    // open_request()
    // =====================================================================

    #[test]
    fn test_open_request_forwards_chat_connect_to_target() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let mut b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::default();

        neg.open_request(&sessions, id(1), id(2), Instant::now()).unwrap();

        let msg = next_frame(&mut b);
        assert_eq!(msg.kind, MessageKind::ChatConnect);
        assert_eq!(msg.sender, id(1));
        assert_eq!(msg.receiver, id(2));
        assert_eq!(neg.len(), 1);
    }

    #[test]
    fn test_open_request_self_fails() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let mut neg = ChatNegotiation::default();

        assert_eq!(
            neg.open_request(&sessions, id(1), id(1), Instant::now()),
            Err(NegotiationError::SelfRequest(id(1)))
        );
        assert!(neg.is_empty());
    }

    #[test]
    fn test_open_request_target_offline_creates_no_record() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let mut neg = ChatNegotiation::default();

        assert_eq!(
            neg.open_request(&sessions, id(1), id(2), Instant::now()),
            Err(NegotiationError::TargetOffline(id(2)))
        );
        assert!(neg.is_empty());
    }

    #[test]
    fn test_open_request_duplicate_pair_fails_in_both_directions() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::default();
        let now = Instant::now();
        neg.open_request(&sessions, id(1), id(2), now).unwrap();

        let expected = Err(NegotiationError::AlreadyPending {
            initiator: id(1),
            target: id(2),
        });
        assert_eq!(neg.open_request(&sessions, id(1), id(2), now), expected);
        assert_eq!(neg.open_request(&sessions, id(2), id(1), now), expected);
        assert_eq!(neg.len(), 1);
    }

    #[test]
    fn test_open_request_replaces_expired_request() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::new(NegotiationConfig {
            request_ttl: Duration::from_secs(10),
            ..NegotiationConfig::default()
        });
        let t0 = Instant::now();
        neg.open_request(&sessions, id(1), id(2), t0).unwrap();

        let later = t0 + Duration::from_secs(11);
        neg.open_request(&sessions, id(2), id(1), later).unwrap();

        let req = neg.pending_between(id(1), id(2)).unwrap();
        assert_eq!(req.initiator, id(2));
        assert_eq!(req.created_at, later);
    }

    // =====================================================================
    // resolve()
    // =====================================================================

    #[test]
    fn test_resolve_without_request_fails() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::default();

        assert_eq!(
            neg.resolve(&sessions, id(2), id(1), true, Instant::now()),
            Err(NegotiationError::NoSuchRequest {
                initiator: id(1),
                responder: id(2),
            })
        );
    }

    #[test]
    fn test_resolve_by_initiator_fails() {
        // Only the target can answer; the initiator "accepting" its own
        // request must not match.
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::default();
        let now = Instant::now();
        neg.open_request(&sessions, id(1), id(2), now).unwrap();

        assert!(neg.resolve(&sessions, id(1), id(2), true, now).is_err());
        assert_eq!(neg.len(), 1);
    }

    #[test]
    fn test_resolve_accept_notifies_initiator_and_removes_request() {
        let mut sessions = SessionRegistry::default();
        let mut a = online(&mut sessions, 1);
        let mut b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::default();
        let now = Instant::now();
        neg.open_request(&sessions, id(1), id(2), now).unwrap();
        let _ = next_frame(&mut b);

        let resolution = neg.resolve(&sessions, id(2), id(1), true, now).unwrap();

        assert_eq!(resolution, Resolution { accepted: true, notified: true });
        let msg = next_frame(&mut a);
        assert_eq!(msg.kind, MessageKind::ChatAccept);
        assert_eq!(msg.sender, id(2));
        assert_eq!(msg.receiver, id(1));
        assert!(neg.is_empty());
    }

    #[test]
    fn test_resolve_deny_then_accept_fails() {
        let mut sessions = SessionRegistry::default();
        let mut a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::default();
        let now = Instant::now();
        neg.open_request(&sessions, id(1), id(2), now).unwrap();

        neg.resolve(&sessions, id(2), id(1), false, now).unwrap();
        assert_eq!(next_frame(&mut a).kind, MessageKind::ChatDeny);
        assert!(a.try_recv().is_err(), "exactly one notice");

        assert!(matches!(
            neg.resolve(&sessions, id(2), id(1), true, now),
            Err(NegotiationError::NoSuchRequest { .. })
        ));
    }

    #[test]
    fn test_resolve_initiator_offline_is_dropped() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::default();
        let now = Instant::now();
        neg.open_request(&sessions, id(1), id(2), now).unwrap();
        sessions.unregister(id(1));

        let resolution = neg.resolve(&sessions, id(2), id(1), true, now).unwrap();

        assert!(!resolution.notified);
        assert!(neg.is_empty());
    }

    #[test]
    fn test_resolve_expired_request_fails_and_is_removed() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::new(NegotiationConfig {
            request_ttl: Duration::from_secs(5),
            ..NegotiationConfig::default()
        });
        let t0 = Instant::now();
        neg.open_request(&sessions, id(1), id(2), t0).unwrap();

        let result = neg.resolve(&sessions, id(2), id(1), true, t0 + Duration::from_secs(6));

        assert!(matches!(result, Err(NegotiationError::NoSuchRequest { .. })));
        assert!(neg.is_empty());
    }

    // =====================================================================
    // expire_stale() / drop_initiator()
    // =====================================================================

    #[test]
    fn test_expire_stale_removes_only_old_requests() {
        let mut sessions = SessionRegistry::default();
        let _rx: Vec<_> = (1..=4).map(|n| online(&mut sessions, n)).collect();
        let mut neg = ChatNegotiation::new(NegotiationConfig {
            request_ttl: Duration::from_secs(60),
            ..NegotiationConfig::default()
        });
        let t0 = Instant::now();
        neg.open_request(&sessions, id(1), id(2), t0).unwrap();
        neg.open_request(&sessions, id(3), id(4), t0 + Duration::from_secs(30)).unwrap();

        let expired = neg.expire_stale(t0 + Duration::from_secs(61));

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].initiator, id(1));
        assert!(neg.pending_between(id(3), id(4)).is_some());
    }

    #[test]
    fn test_expire_stale_disabled_keeps_everything() {
        let mut sessions = SessionRegistry::default();
        let _a = online(&mut sessions, 1);
        let _b = online(&mut sessions, 2);
        let mut neg = ChatNegotiation::new(NegotiationConfig {
            request_ttl: Duration::ZERO,
            ..NegotiationConfig::default()
        });
        let t0 = Instant::now();
        neg.open_request(&sessions, id(1), id(2), t0).unwrap();

        assert!(neg.expire_stale(t0 + Duration::from_secs(86_400)).is_empty());
        assert_eq!(neg.len(), 1);
    }

    #[test]
    fn test_drop_initiator_keeps_requests_targeting_it() {
        let mut sessions = SessionRegistry::default();
        let _rx: Vec<_> = (1..=3).map(|n| online(&mut sessions, n)).collect();
        let mut neg = ChatNegotiation::default();
        let now = Instant::now();
        neg.open_request(&sessions, id(1), id(2), now).unwrap();
        neg.open_request(&sessions, id(3), id(1), now).unwrap();

        assert_eq!(neg.drop_initiator(id(1)), 1);
        assert!(neg.pending_between(id(1), id(2)).is_none());
        assert!(neg.pending_between(id(3), id(1)).is_some());
    }
}
