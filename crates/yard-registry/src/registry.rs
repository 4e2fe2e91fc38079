use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use rand::Rng;
use uuid::Uuid;

use crate::client::{Client, ConnId, PendingFrame};
use crate::error::RegistryError;
use crate::session::Session;

/// In-memory directory of clients keyed by id, fingerprint, and connection;
/// owns sessions and pending-message queues.
///
/// All mutation goes through a single write lock over the whole table
/// rather than a lock per client. Two peers' sessions are always updated
/// together under that one lock, so there is no lock-ordering hazard to
/// get wrong across a session's two sides.
pub struct ClientRegistry {
    id_len: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    clients: AHashMap<String, Client>,
    by_fingerprint: AHashMap<Uuid, String>,
    by_conn: AHashMap<ConnId, String>,
}

impl ClientRegistry {
    pub fn new(id_len: usize) -> Self {
        Self {
            id_len,
            inner: RwLock::new(Inner {
                clients: AHashMap::new(),
                by_fingerprint: AHashMap::new(),
                by_conn: AHashMap::new(),
            }),
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<Client> {
        self.inner.read().clients.get(id).cloned()
    }

    pub fn get_by_fingerprint(&self, fingerprint: Uuid) -> Option<Client> {
        let inner = self.inner.read();
        let id = inner.by_fingerprint.get(&fingerprint)?;
        inner.clients.get(id).cloned()
    }

    pub fn get_by_conn(&self, conn: ConnId) -> Option<Client> {
        let inner = self.inner.read();
        let id = inner.by_conn.get(&conn)?;
        inner.clients.get(id).cloned()
    }

    /// Reuses an existing client bound to `fingerprint` if one exists,
    /// marking it online on the new connection and resetting its sessions
    /// and pending queue; otherwise allocates a fresh id. Returns the
    /// client's new state, and the previous connection id if a live one was
    /// displaced (the caller is responsible for tearing that stream down).
    pub fn create_client(&self, fingerprint: Uuid, conn: ConnId) -> (Client, Option<ConnId>) {
        let mut inner = self.inner.write();

        if let Some(id) = inner.by_fingerprint.get(&fingerprint).cloned() {
            let previous_conn = inner.clients.get(&id).and_then(|c| c.conn);
            if let Some(previous) = previous_conn {
                inner.by_conn.remove(&previous);
            }

            let sessions: Vec<(u8, Arc<Session>)> = inner
                .clients
                .get(&id)
                .map(|c| c.sessions.iter().map(|(k, v)| (*k, v.clone())).collect())
                .unwrap_or_default();
            Self::clear_peer_side(&mut inner, &id, sessions);

            let client = inner.clients.get_mut(&id).expect("indexed by fingerprint");
            client.reactivate(conn);
            let snapshot = client.clone();
            inner.by_conn.insert(conn, id);
            return (snapshot, previous_conn);
        }

        let id = self.generate_unique_id(&inner);
        let client = Client::fresh(id.clone(), fingerprint, conn);
        inner.clients.insert(id.clone(), client.clone());
        inner.by_fingerprint.insert(fingerprint, id.clone());
        inner.by_conn.insert(conn, id);
        (client, None)
    }

    /// Removes a client entirely, dropping its sessions (and the matching
    /// entries on each session's other peer) and its pending queue.
    pub fn pop_client(&self, id: &str) -> Option<Client> {
        let mut inner = self.inner.write();
        Self::remove_client_locked(&mut inner, id)
    }

    /// Marks a client offline without forgetting its id/fingerprint
    /// mapping, dropping its sessions and pending queue the same way
    /// `pop_client` would.
    pub fn mark_offline(&self, id: &str) {
        let mut inner = self.inner.write();

        let sessions: Vec<(u8, Arc<Session>)> = match inner.clients.get(id) {
            Some(client) => client.sessions.iter().map(|(k, v)| (*k, v.clone())).collect(),
            None => return,
        };

        Self::clear_peer_side(&mut inner, id, sessions);

        if let Some(conn) = inner.clients.get(id).and_then(|c| c.conn) {
            inner.by_conn.remove(&conn);
        }

        if let Some(client) = inner.clients.get_mut(id) {
            client.go_offline();
        }
    }

    /// Drops the client previously bound to `fingerprint` (if any) and
    /// registers a brand new id for the same fingerprint, attached to
    /// `conn`. Unlike `create_client`, this always mints a new id.
    pub fn rename(&self, fingerprint: Uuid, conn: ConnId) -> Result<Client, RegistryError> {
        let mut inner = self.inner.write();
        let old_id = inner
            .by_fingerprint
            .get(&fingerprint)
            .cloned()
            .ok_or(RegistryError::NotFound)?;
        Self::remove_client_locked(&mut inner, &old_id);

        let id = self.generate_unique_id(&inner);
        let client = Client::fresh(id.clone(), fingerprint, conn);
        inner.clients.insert(id.clone(), client.clone());
        inner.by_fingerprint.insert(fingerprint, id.clone());
        inner.by_conn.insert(conn, id);
        Ok(client)
    }

    pub fn push_pending(&self, id: &str, session: u8, payload: String) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let client = inner.clients.get_mut(id).ok_or(RegistryError::NotFound)?;
        client.pending.push_back(PendingFrame { session, payload });
        Ok(())
    }

    pub fn pop_pending(&self, id: &str) -> Option<PendingFrame> {
        self.inner.write().clients.get_mut(id)?.pending.pop_front()
    }

    /// Returns the existing session id if `a` and `b` already share one
    /// (idempotent), otherwise allocates the smallest id in 1..255 absent
    /// from both clients' session maps.
    pub fn create_session(&self, a: &str, b: &str) -> Result<u8, RegistryError> {
        let mut inner = self.inner.write();

        {
            let client_a = inner.clients.get(a).ok_or(RegistryError::NotFound)?;
            let client_b = inner.clients.get(b).ok_or(RegistryError::NotFound)?;
            if let Some(&existing) = client_a
                .sessions
                .keys()
                .find(|id| client_b.sessions.contains_key(id))
            {
                return Ok(existing);
            }
        }

        let id = (1u16..256)
            .map(|v| v as u8)
            .find(|id| {
                !inner.clients[a].sessions.contains_key(id) && !inner.clients[b].sessions.contains_key(id)
            })
            .ok_or(RegistryError::SessionSpaceExhausted)?;

        let session = Arc::new(Session {
            id,
            peers: (a.to_owned(), b.to_owned()),
        });

        inner.clients.get_mut(a).expect("checked above").sessions.insert(id, session.clone());
        inner.clients.get_mut(b).expect("checked above").sessions.insert(id, session);
        Ok(id)
    }

    /// Deletes a session from both peers and drops pending frames tagged
    /// with it from both queues.
    pub fn remove_session(&self, client_id: &str, session_id: u8) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        let session = inner
            .clients
            .get_mut(client_id)
            .and_then(|c| c.sessions.remove(&session_id))
            .ok_or(RegistryError::NotFound)?;

        inner
            .clients
            .get_mut(client_id)
            .expect("just looked up")
            .pending
            .retain(|p| p.session != session_id);

        if let Some(peer_id) = session.other(client_id).cloned() {
            if let Some(peer) = inner.clients.get_mut(&peer_id) {
                peer.sessions.remove(&session_id);
                peer.pending.retain(|p| p.session != session_id);
            }
        }

        Ok(())
    }

    fn remove_client_locked(inner: &mut Inner, id: &str) -> Option<Client> {
        let client = inner.clients.remove(id)?;
        inner.by_fingerprint.remove(&client.fingerprint);
        if let Some(conn) = client.conn {
            inner.by_conn.remove(&conn);
        }

        let sessions: Vec<(u8, Arc<Session>)> = client.sessions.iter().map(|(k, v)| (*k, v.clone())).collect();
        Self::clear_peer_side(inner, id, sessions);

        Some(client)
    }

    /// Drops `id`'s own entry from every peer named by `sessions`: the
    /// matching session id and any queued pending frames tagged with it.
    /// Does not touch `id`'s own `sessions`/`pending` — callers clear those
    /// themselves, since the three call sites (reactivate-on-reINIT,
    /// mark-offline, full removal) differ on what "own side" cleanup means.
    fn clear_peer_side(inner: &mut Inner, id: &str, sessions: impl IntoIterator<Item = (u8, Arc<Session>)>) {
        for (session_id, session) in sessions {
            if let Some(peer_id) = session.other(id).cloned() {
                if let Some(peer) = inner.clients.get_mut(&peer_id) {
                    peer.sessions.remove(&session_id);
                    peer.pending.retain(|p| p.session != session_id);
                }
            }
        }
    }

    fn generate_unique_id(&self, inner: &Inner) -> String {
        loop {
            let candidate = self.generate_id();
            if !inner.clients.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn generate_id(&self) -> String {
        let mut rng = rand::rng();
        (0..self.id_len)
            .map(|_| rng.random_range(b'A'..=b'Z') as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(8)
    }

    #[test]
    fn create_client_generates_unique_id_of_configured_length() {
        let reg = registry();
        let (client, displaced) = reg.create_client(Uuid::new_v4(), 1);
        assert_eq!(client.client_id.len(), 8);
        assert!(client.client_id.chars().all(|c| c.is_ascii_uppercase()));
        assert!(displaced.is_none());
    }

    #[test]
    fn create_client_reuses_fingerprint_and_displaces_old_conn() {
        let reg = registry();
        let fp = Uuid::new_v4();
        let (first, _) = reg.create_client(fp, 1);
        let (second, displaced) = reg.create_client(fp, 2);
        assert_eq!(first.client_id, second.client_id);
        assert_eq!(displaced, Some(1));
        assert_eq!(reg.get_by_conn(1), None);
        assert_eq!(reg.get_by_conn(2).unwrap().client_id, first.client_id);
    }

    #[test]
    fn reinit_with_active_session_drops_it_from_the_peer_too() {
        let reg = registry();
        let fp = Uuid::new_v4();
        let (a, _) = reg.create_client(fp, 1);
        let (b, _) = reg.create_client(Uuid::new_v4(), 2);
        let sid = reg.create_session(&a.client_id, &b.client_id).unwrap();
        reg.push_pending(&b.client_id, sid, "hello".into()).unwrap();

        reg.create_client(fp, 3);

        assert!(reg.get_by_id(&b.client_id).unwrap().sessions.is_empty());
        assert!(reg.pop_pending(&b.client_id).is_none());
    }

    #[test]
    fn create_session_is_idempotent() {
        let reg = registry();
        let (a, _) = reg.create_client(Uuid::new_v4(), 1);
        let (b, _) = reg.create_client(Uuid::new_v4(), 2);
        let s1 = reg.create_session(&a.client_id, &b.client_id).unwrap();
        let s2 = reg.create_session(&a.client_id, &b.client_id).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn remove_session_drops_both_sides_and_their_pending() {
        let reg = registry();
        let (a, _) = reg.create_client(Uuid::new_v4(), 1);
        let (b, _) = reg.create_client(Uuid::new_v4(), 2);
        let sid = reg.create_session(&a.client_id, &b.client_id).unwrap();
        reg.push_pending(&b.client_id, sid, "hello".into()).unwrap();

        reg.remove_session(&a.client_id, sid).unwrap();

        assert!(reg.get_by_id(&a.client_id).unwrap().sessions.is_empty());
        assert!(reg.get_by_id(&b.client_id).unwrap().sessions.is_empty());
        assert!(reg.pop_pending(&b.client_id).is_none());
    }

    #[test]
    fn mark_offline_clears_sessions_on_both_peers() {
        let reg = registry();
        let (a, _) = reg.create_client(Uuid::new_v4(), 1);
        let (b, _) = reg.create_client(Uuid::new_v4(), 2);
        reg.create_session(&a.client_id, &b.client_id).unwrap();

        reg.mark_offline(&a.client_id);

        assert!(!reg.get_by_id(&a.client_id).unwrap().online);
        assert!(reg.get_by_id(&b.client_id).unwrap().sessions.is_empty());
    }

    #[test]
    fn pending_queue_is_fifo() {
        let reg = registry();
        let (a, _) = reg.create_client(Uuid::new_v4(), 1);
        let (b, _) = reg.create_client(Uuid::new_v4(), 2);
        let sid = reg.create_session(&a.client_id, &b.client_id).unwrap();

        reg.push_pending(&b.client_id, sid, "x".into()).unwrap();
        reg.push_pending(&b.client_id, sid, "y".into()).unwrap();

        assert_eq!(reg.pop_pending(&b.client_id).unwrap().payload, "x");
        assert_eq!(reg.pop_pending(&b.client_id).unwrap().payload, "y");
        assert!(reg.pop_pending(&b.client_id).is_none());
    }

    #[test]
    fn session_space_exhaustion_leaves_existing_sessions_intact() {
        let reg = registry();
        let (a, _) = reg.create_client(Uuid::new_v4(), 1);
        let mut others = Vec::new();
        for i in 0..255 {
            let (c, _) = reg.create_client(Uuid::new_v4(), 100 + i);
            reg.create_session(&a.client_id, &c.client_id).unwrap();
            others.push(c);
        }

        let (extra, _) = reg.create_client(Uuid::new_v4(), 999);
        let err = reg.create_session(&a.client_id, &extra.client_id).unwrap_err();
        assert!(matches!(err, RegistryError::SessionSpaceExhausted));
        assert_eq!(reg.get_by_id(&a.client_id).unwrap().sessions.len(), 255);
    }
}
