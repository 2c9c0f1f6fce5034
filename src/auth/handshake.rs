use crate::auth::pkce::ChallengeMethod;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Context held while an authorization round trip is in flight, keyed by
/// its `state` value. The verifier never leaves the process except in the
/// final token exchange.
#[derive(Debug, Clone)]
pub struct PendingHandshake {
    pub verifier: String,
    pub method: ChallengeMethod,
    expires_at: Instant,
}

/// In-memory store of pending handshakes. Entries are single-use and
/// expire after the TTL; at most one handshake may be pending at a time,
/// so a second concurrent sign-in cannot silently overwrite the first.
pub struct HandshakeStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingHandshake>>,
}

impl HandshakeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handshake. Returns false when another unexpired
    /// handshake is still pending.
    pub fn try_begin(&self, state: &str, verifier: String, method: ChallengeMethod) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut entries);
        if !entries.is_empty() {
            return false;
        }
        entries.insert(
            state.to_string(),
            PendingHandshake {
                verifier,
                method,
                expires_at: Instant::now() + self.ttl,
            },
        );
        true
    }

    /// Take the handshake matching `state`, consuming it. Returns None
    /// when the state is unknown or the entry already expired.
    pub fn consume(&self, state: &str) -> Option<PendingHandshake> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(state).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry)
            } else {
                debug!("handshake for state {} had already expired", state);
                None
            }
        })
    }

    /// Drop the entry for `state` if it is still there. Called on every
    /// terminal outcome of a login attempt.
    pub fn discard(&self, state: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(state);
    }

    /// Drop everything pending, e.g. when the user aborts a sign-in.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn has_pending(&self) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge_expired(&mut entries);
        !entries.is_empty()
    }

    fn purge_expired(entries: &mut HashMap<String, PendingHandshake>) {
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }
}
