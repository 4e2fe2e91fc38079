//! The UDP rendezvous map: correlates a control-channel REQ with a UDP
//! "ping" carrying the same token, so the server can learn the requester's
//! public endpoint. Modeled on the self-expiring credential map pattern,
//! ported to an async background task since the rest of the server is
//! async.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::timeout;

pub struct Rendezvous {
    entries: Mutex<AHashMap<String, (SocketAddr, Instant)>>,
    notify: Notify,
    ttl: Duration,
}

impl Rendezvous {
    pub fn new(ttl: Duration) -> Arc<Self> {
        let this = Arc::new(Self {
            entries: Mutex::new(AHashMap::new()),
            notify: Notify::new(),
            ttl,
        });
        this.spawn_expiry();
        this
    }

    /// Records a token observed from a UDP source, and wakes anyone waiting
    /// on the rendezvous map.
    pub fn record(&self, token: String, source: SocketAddr) {
        self.entries.lock().insert(token, (source, Instant::now()));
        self.notify.notify_waiters();
    }

    /// Waits up to `wait` for `token` to arrive from `expected_ip`. On
    /// match, consumes the entry and returns its endpoint.
    pub async fn wait_for(
        &self,
        token: &str,
        expected_ip: IpAddr,
        wait: Duration,
    ) -> Option<SocketAddr> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(addr) = self.try_consume(token, expected_ip) {
                return Some(addr);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            // A wake that turns out to be for a different token just loops
            // back around and re-checks the deadline.
            let _ = timeout(remaining, self.notify.notified()).await;
        }
    }

    fn try_consume(&self, token: &str, expected_ip: IpAddr) -> Option<SocketAddr> {
        let mut entries = self.entries.lock();
        let (addr, _) = entries.get(token)?;
        if addr.ip() != expected_ip {
            return None;
        }
        let addr = *addr;
        entries.remove(token);
        Some(addr)
    }

    fn spawn_expiry(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let Some(this) = weak.upgrade() else {
                    break;
                };

                let now = Instant::now();
                let ttl = this.ttl;
                this.entries
                    .lock()
                    .retain(|_, (_, created)| now.duration_since(*created) < ttl);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_wait_matches_on_ip() {
        let rendezvous = Rendezvous::new(Duration::from_secs(10));
        let source: SocketAddr = "203.0.113.5:4000".parse().unwrap();
        rendezvous.record("tok-42".into(), source);

        let found = rendezvous
            .wait_for("tok-42", source.ip(), Duration::from_millis(200))
            .await;
        assert_eq!(found, Some(source));
    }

    #[tokio::test]
    async fn wait_times_out_when_nothing_arrives() {
        let rendezvous = Rendezvous::new(Duration::from_secs(10));
        let found = rendezvous
            .wait_for("never", "203.0.113.5".parse().unwrap(), Duration::from_millis(50))
            .await;
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn ip_mismatch_does_not_match() {
        let rendezvous = Rendezvous::new(Duration::from_secs(10));
        let source: SocketAddr = "203.0.113.5:4000".parse().unwrap();
        rendezvous.record("tok-42".into(), source);

        let found = rendezvous
            .wait_for("tok-42", "198.51.100.9".parse().unwrap(), Duration::from_millis(50))
            .await;
        assert_eq!(found, None);
    }
}
