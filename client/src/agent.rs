//! Drives INIT/REN/REQ/PING/CONN/TERM from the peer side and adapts the
//! PING cadence: default 5 s, forced to 1 s for the one PING right after
//! sending a CONN, reset back to default on TERM.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;
use yard_codec::channel::ControlChannel;
use yard_codec::control::MessageType;

use crate::error::ClientError;
use crate::protocol::SubMessage;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);
pub const FAST_PING_INTERVAL: Duration = Duration::from_secs(1);

/// The adaptive PING timer. A plain mutex is enough: cadence changes are
/// infrequent compared to the sleeps the ping loop does between reads of
/// it.
pub struct PingCadence {
    current: Mutex<Duration>,
    default: Duration,
}

impl PingCadence {
    pub fn new(default: Duration) -> Self {
        Self {
            current: Mutex::new(default),
            default,
        }
    }

    pub fn force(&self, interval: Duration) {
        *self.current.lock().unwrap() = interval;
    }

    pub fn reset(&self) {
        *self.current.lock().unwrap() = self.default;
    }

    pub fn get(&self) -> Duration {
        *self.current.lock().unwrap()
    }
}

impl Default for PingCadence {
    fn default() -> Self {
        Self::new(DEFAULT_PING_INTERVAL)
    }
}

/// A routed CONN payload surfaced by a PING, with the session it arrived
/// on.
pub struct Routed {
    pub session: u8,
    pub message: SubMessage,
}

pub struct SignalingAgent {
    channel: ControlChannel,
}

impl SignalingAgent {
    pub fn new(channel: ControlChannel) -> Self {
        Self { channel }
    }

    pub async fn init(&self, fingerprint: Uuid) -> Result<(String, String), ClientError> {
        let frame = self
            .channel
            .send_receive(0, MessageType::Init, &fingerprint.to_string())
            .await?;
        Self::parse_id_and_ip(frame)
    }

    pub async fn ren(&self, fingerprint: Uuid) -> Result<(String, String), ClientError> {
        let frame = self
            .channel
            .send_receive(0, MessageType::Ren, &fingerprint.to_string())
            .await?;
        Self::parse_id_and_ip(frame)
    }

    fn parse_id_and_ip(frame: yard_codec::control::ControlFrame) -> Result<(String, String), ClientError> {
        if frame.typ == MessageType::Err {
            return Err(ClientError::BadSubProtocol);
        }
        let mut parts = frame.payload.splitn(2, ' ');
        let id = parts.next().ok_or(ClientError::BadSubProtocol)?.to_owned();
        let remote_ip = parts.next().unwrap_or("").to_owned();
        Ok((id, remote_ip))
    }

    /// Polls once. Returns `Some` if the server handed back a routed CONN
    /// payload (anything other than an empty payload on session 0).
    pub async fn ping(&self) -> Result<Option<Routed>, ClientError> {
        let frame = self.channel.send_receive(0, MessageType::Ping, "").await?;
        if frame.session == 0 && frame.payload.is_empty() {
            return Ok(None);
        }
        let message = SubMessage::parse(&frame.payload)?;
        Ok(Some(Routed {
            session: frame.session,
            message,
        }))
    }

    /// Issues REQ for `target_id` with `secret`; `None` means the server
    /// found no UDP ping matching `secret` within its window (or the
    /// target doesn't exist — the two are indistinguishable by design).
    pub async fn req(&self, target_id: &str, secret: &str) -> Result<Option<(u8, SocketAddr)>, ClientError> {
        let frame = self
            .channel
            .send_receive(0, MessageType::Req, &format!("{target_id} {secret}"))
            .await?;

        if frame.payload.is_empty() {
            return Ok(None);
        }

        let mut parts = frame.payload.split(' ');
        let session: u8 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(ClientError::BadSubProtocol)?;
        let ip: std::net::IpAddr = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(ClientError::BadSubProtocol)?;
        let port: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(ClientError::BadSubProtocol)?;

        Ok(Some((session, SocketAddr::new(ip, port))))
    }

    pub async fn conn(&self, session: u8, message: &SubMessage) -> Result<(), ClientError> {
        self.channel.send_receive(session, MessageType::Conn, &message.to_wire()).await?;
        Ok(())
    }

    pub async fn term(&self, session: u8) -> Result<(), ClientError> {
        self.channel.send_receive(session, MessageType::Term, "").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_forces_and_resets() {
        let cadence = PingCadence::new(DEFAULT_PING_INTERVAL);
        assert_eq!(cadence.get(), DEFAULT_PING_INTERVAL);
        cadence.force(FAST_PING_INTERVAL);
        assert_eq!(cadence.get(), FAST_PING_INTERVAL);
        cadence.reset();
        assert_eq!(cadence.get(), DEFAULT_PING_INTERVAL);
    }
}
