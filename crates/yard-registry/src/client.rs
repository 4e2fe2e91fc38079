use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap;
use uuid::Uuid;

use crate::session::Session;

/// Opaque identity of a control connection, assigned by the caller (the
/// server hands out a monotonically increasing counter per accepted
/// stream). Used only for `get_by_conn` and to tell "my own old connection"
/// apart from a fresh one during re-INIT.
pub type ConnId = u64;

/// A control frame intended for a peer who has not yet polled with PING.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub session: u8,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct Client {
    pub client_id: String,
    pub fingerprint: Uuid,
    pub online: bool,
    pub conn: Option<ConnId>,
    pub sessions: AHashMap<u8, Arc<Session>>,
    pub pending: VecDeque<PendingFrame>,
}

impl Client {
    pub(crate) fn fresh(client_id: String, fingerprint: Uuid, conn: ConnId) -> Self {
        Self {
            client_id,
            fingerprint,
            online: true,
            conn: Some(conn),
            sessions: AHashMap::new(),
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn reactivate(&mut self, conn: ConnId) {
        self.online = true;
        self.conn = Some(conn);
        self.sessions.clear();
        self.pending.clear();
    }

    pub(crate) fn go_offline(&mut self) {
        self.online = false;
        self.conn = None;
        self.sessions.clear();
        self.pending.clear();
    }
}
