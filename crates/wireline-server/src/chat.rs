//! Chat session state machine.
//!
//! Tracks pending chat negotiations and established paired sessions. The
//! state of an identifier is encoded by presence in two maps rather than an
//! explicit field: no entry anywhere means idle, a pending entry keyed by
//! the identifier means a request awaits its answer, an active entry means
//! the identifier is chatting.
//!
//! # Invariants
//!
//! - At most one pending request per target; a later request to the same
//!   target silently displaces the earlier one.
//! - The active map is symmetric: if A maps to B then B maps to A. Entries
//!   are created and destroyed in pairs, never singly.
//!
//! The table is pure state with no I/O; delivery is the caller's job, driven
//! by the outcome types returned here.

use std::collections::HashMap;

use crate::registry::ClientRegistry;

/// Pending negotiations and established chat pairings.
#[derive(Debug, Default)]
pub struct ChatTable {
    /// Target identifier → requester identifier.
    pending: HashMap<String, String>,
    /// Identifier → peer identifier, always symmetric.
    active: HashMap<String, String>,
}

/// Outcome of a chat request attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Target was empty or the requester itself; reply `invalid_chat_target`.
    InvalidTarget,
    /// Requester or target is already in a session; reply `already_in_chat`.
    Busy,
    /// Target is not registered; reply `nodeliver`.
    TargetOffline,
    /// Pending entry installed; forward the invitation to the target.
    Requested {
        /// Session currently holding the target identifier.
        target_session: u64,
    },
}

/// Outcome of answering a pending chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Nothing was pending for the acceptor; reply `no_pending_chat`.
    NoPending,
    /// The requester disconnected while the request was pending. The pending
    /// entry is dropped and the acceptor gets no confirmation.
    RequesterGone,
    /// Session established; confirm to both parties.
    Established {
        /// The requester the acceptor is now paired with.
        requester: String,
        /// Session currently holding the requester identifier.
        requester_session: u64,
    },
}

impl ChatTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to open a negotiation from `requester` to `target`.
    ///
    /// Precedence: invalid target, then either party busy, then target
    /// offline. On success the pending entry for `target` is installed,
    /// silently displacing any previous requester for that target.
    pub fn request(
        &mut self,
        requester: &str,
        target: &str,
        registry: &ClientRegistry,
    ) -> RequestOutcome {
        if target.is_empty() || target == requester {
            return RequestOutcome::InvalidTarget;
        }
        if self.active.contains_key(requester) || self.active.contains_key(target) {
            return RequestOutcome::Busy;
        }
        let Some(target_session) = registry.lookup(target) else {
            return RequestOutcome::TargetOffline;
        };

        self.pending.insert(target.to_owned(), requester.to_owned());
        RequestOutcome::Requested { target_session }
    }

    /// Answer the pending request addressed to `acceptor`, if any.
    ///
    /// The pending entry is removed unconditionally; the session pair is
    /// only created if the requester is still registered.
    pub fn accept(&mut self, acceptor: &str, registry: &ClientRegistry) -> AcceptOutcome {
        let Some(requester) = self.pending.remove(acceptor) else {
            return AcceptOutcome::NoPending;
        };
        let Some(requester_session) = registry.lookup(&requester) else {
            return AcceptOutcome::RequesterGone;
        };

        self.active.insert(acceptor.to_owned(), requester.clone());
        self.active.insert(requester.clone(), acceptor.to_owned());
        AcceptOutcome::Established { requester, requester_session }
    }

    /// Decline the pending request addressed to `acceptor`.
    ///
    /// Returns the displaced requester so the caller can notify it
    /// best-effort. Succeeds (as a no-op) even with nothing pending.
    pub fn reject(&mut self, acceptor: &str) -> Option<String> {
        self.pending.remove(acceptor)
    }

    /// Whether `a` and `b` currently form an established pair.
    pub fn is_paired(&self, a: &str, b: &str) -> bool {
        self.active.get(a).is_some_and(|peer| peer == b)
            && self.active.get(b).is_some_and(|peer| peer == a)
    }

    /// Whether `id` is in an established session.
    pub fn in_session(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Requester of the pending request addressed to `target`, if any.
    pub fn pending_requester(&self, target: &str) -> Option<&str> {
        self.pending.get(target).map(String::as_str)
    }

    /// Remove all state involving `id` on disconnect.
    ///
    /// Tears down the session pair if one exists (returning the peer so the
    /// caller can notify it) and drops every pending entry where `id` is
    /// either the target or the requester.
    pub fn disconnect_cleanup(&mut self, id: &str) -> Option<String> {
        let peer = self.active.remove(id);
        if let Some(peer) = &peer {
            self.active.remove(peer);
        }

        self.pending.retain(|target, requester| target != id && requester != id);
        peer
    }
}
