//! Reconnection identity: the session store is a small capability accepted
//! at construction rather than ambient global state, so callers control its
//! persistence (in-memory for one tab, or backed by `sessionStorage` once
//! compiled to wasm). A star topology needs a logical id that survives a
//! dropped transport, which is why the host hands out a
//! [`protocol::SessionToken`] on admission and the guest that received it
//! is the one who has to remember it across a page reload.
//!
//! Unlike the host's in-process roster (`HostLobby` keeps every admitted
//! player's token in memory for the lifetime of the lobby, which is all it
//! ever needs), a guest has exactly one identity worth persisting: its own.
//! `SessionStore` is a single cell, not a keyed table.

use protocol::{PeerId, SessionToken};

/// What a guest remembers about itself across a dropped connection or page
/// reload: the logical id the host admitted, the token proving it, and the
/// display name it joined under.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StoredIdentity {
    pub logical_id: PeerId,
    pub display_name: String,
    pub session_token: SessionToken,
}

/// Guest-side persistence of its own reconnection identity, injected so the
/// guest application controls storage (in-memory for a single tab session,
/// or backed by `sessionStorage` once compiled to wasm).
pub trait SessionStore {
    fn load(&self) -> Option<StoredIdentity>;
    fn save(&mut self, identity: &StoredIdentity);
    fn clear(&mut self);
}

/// Default [`SessionStore`]: lives only as long as the guest process.
#[derive(Default)]
pub struct InMemorySessionStore {
    slot: Option<StoredIdentity>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self) -> Option<StoredIdentity> {
        self.slot.clone()
    }

    fn save(&mut self, identity: &StoredIdentity) {
        self.slot = Some(identity.clone());
    }

    fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(logical_id: &str, token: &str) -> StoredIdentity {
        StoredIdentity {
            logical_id: logical_id.into(),
            display_name: "Guest".into(),
            session_token: token.into(),
        }
    }

    #[test]
    fn round_trips_the_saved_identity() {
        let mut store = InMemorySessionStore::new();
        store.save(&identity("p1", "tok-1"));
        assert_eq!(store.load().unwrap().session_token, "tok-1");
    }

    #[test]
    fn save_overwrites_the_previous_identity() {
        let mut store = InMemorySessionStore::new();
        store.save(&identity("p1", "tok-1"));
        store.save(&identity("p1", "tok-2"));
        assert_eq!(store.load().unwrap().session_token, "tok-2");
    }

    #[test]
    fn clear_empties_the_slot() {
        let mut store = InMemorySessionStore::new();
        store.save(&identity("p1", "tok-1"));
        store.clear();
        assert!(store.load().is_none());
    }
}
