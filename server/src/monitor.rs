//! Lightweight per-client traffic counters, observability only — never
//! consulted by dispatch logic.

use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct Counts {
    pub frames_in: AtomicUsize,
    pub frames_out: AtomicUsize,
    pub bytes_in: AtomicUsize,
    pub bytes_out: AtomicUsize,
}

#[derive(Default)]
pub struct Monitor {
    clients: RwLock<AHashMap<String, Counts>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_in(&self, client_id: &str, bytes: usize) {
        self.with_counts(client_id, |c| {
            c.frames_in.fetch_add(1, Ordering::Relaxed);
            c.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        });
    }

    pub fn record_out(&self, client_id: &str, bytes: usize) {
        self.with_counts(client_id, |c| {
            c.frames_out.fetch_add(1, Ordering::Relaxed);
            c.bytes_out.fetch_add(bytes, Ordering::Relaxed);
        });
    }

    pub fn remove(&self, client_id: &str) {
        self.clients.write().remove(client_id);
    }

    fn with_counts(&self, client_id: &str, f: impl FnOnce(&Counts)) {
        if let Some(counts) = self.clients.read().get(client_id) {
            f(counts);
            return;
        }

        let mut clients = self.clients.write();
        let counts = clients.entry(client_id.to_owned()).or_default();
        f(counts);
    }
}
