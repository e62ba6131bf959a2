//! Connection registry: the authoritative identifier → connection mapping.
//!
//! At most one connection holds an identifier at any time. Registering an
//! identifier that is already mapped evicts the previous holder (the caller
//! is responsible for notifying and closing it); unregistration is guarded
//! so that a handler racing its own cleanup against a newer registration
//! never removes a mapping it no longer owns.

use std::collections::HashMap;

/// Identifier → session mapping for live connections.
///
/// Sessions are the runtime's numeric handles for connections; the registry
/// never touches I/O itself.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, u64>,
}

impl ClientRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `id → session_id`, returning the session that previously held
    /// `id` so the caller can notify and close it. Never fails.
    pub fn register(&mut self, id: &str, session_id: u64) -> Option<u64> {
        self.clients.insert(id.to_owned(), session_id)
    }

    /// Current session for `id`, if registered.
    pub fn lookup(&self, id: &str) -> Option<u64> {
        self.clients.get(id).copied()
    }

    /// Whether `id` is currently registered.
    pub fn is_registered(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Remove the mapping for `id` only if it still points to `session_id`.
    ///
    /// Returns `true` if the mapping was removed. A `false` return means a
    /// newer registration has already replaced this one and the caller must
    /// not run identifier-level cleanup.
    pub fn unregister(&mut self, id: &str, session_id: u64) -> bool {
        if self.clients.get(id) == Some(&session_id) {
            self.clients.remove(id);
            true
        } else {
            false
        }
    }

    /// Number of registered identifiers.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
