//! The control channel: a framed full-duplex transport over a reliable byte
//! stream with access-code correlation, per-request timeouts, and a
//! receive-side cache for out-of-order replies.

use std::time::Duration;

use ahash::AHashMap;
use bytes::BytesMut;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::Error;
use crate::control::{ControlFrame, Header, MessageType, HEADER_LEN};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Allocates the lowest free byte in 1..255. 0 is reserved for "unsolicited".
struct AccessCodePool {
    used: [bool; 256],
}

impl AccessCodePool {
    fn new() -> Self {
        Self { used: [false; 256] }
    }

    fn alloc(&mut self) -> Option<u8> {
        (1u16..256).map(|v| v as u8).find(|&code| {
            if !self.used[code as usize] {
                self.used[code as usize] = true;
                true
            } else {
                false
            }
        })
    }

    fn free(&mut self, code: u8) {
        self.used[code as usize] = false;
    }
}

pub struct ControlChannel {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    pool: SyncMutex<AccessCodePool>,
    cache: SyncMutex<AHashMap<u8, ControlFrame>>,
    timeout: Duration,
}

impl ControlChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_timeout(stream, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(stream: TcpStream, timeout: Duration) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            pool: SyncMutex::new(AccessCodePool::new()),
            cache: SyncMutex::new(AHashMap::new()),
            timeout,
        }
    }

    /// Writes one frame with the given, caller-chosen access code. Used
    /// directly by the server, which always replies with the access code it
    /// was sent, needing no correlation of its own.
    pub async fn send(
        &self,
        session: u8,
        typ: MessageType,
        access_code: u8,
        payload: &str,
    ) -> Result<(), Error> {
        let frame = ControlFrame {
            session,
            typ,
            access_code,
            payload: payload.to_owned(),
        };

        let mut bytes = BytesMut::new();
        frame.encode(&mut bytes)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        log::trace!(
            "control send session={} typ={:?} access_code={} len={}",
            session,
            typ,
            access_code,
            payload.len()
        );
        Ok(())
    }

    /// Reads one frame off the stream. Zero bytes on the header read means
    /// the remote closed the connection.
    pub async fn receive(&self) -> Result<ControlFrame, Error> {
        let mut reader = self.reader.lock().await;
        self.receive_locked(&mut reader).await
    }

    async fn receive_locked(&self, reader: &mut OwnedReadHalf) -> Result<ControlFrame, Error> {
        let mut header_bytes = [0u8; HEADER_LEN];
        let n = reader.read_exact(&mut header_bytes).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::ConnectionAborted
            } else {
                Error::Io(e)
            }
        })?;
        if n == 0 {
            return Err(Error::ConnectionAborted);
        }

        let header = Header::decode(&header_bytes)?;
        let mut payload = vec![0u8; header.payload_len as usize];
        reader.read_exact(&mut payload).await?;

        let frame = ControlFrame::from_parts(header, &payload)?;
        log::trace!(
            "control recv session={} typ={:?} access_code={} len={}",
            frame.session,
            frame.typ,
            frame.access_code,
            frame.payload.len()
        );
        Ok(frame)
    }

    /// Allocates the lowest free access code, writes the request, then reads
    /// frames until one with the matching code arrives, stashing every other
    /// frame into the reply cache for a later call to consult.
    pub async fn send_receive(
        &self,
        session: u8,
        typ: MessageType,
        payload: &str,
    ) -> Result<ControlFrame, Error> {
        let code = {
            let mut pool = self.pool.lock();
            pool.alloc().ok_or(Error::ResourceExhausted)?
        };

        let result = self.send_receive_with_code(session, typ, payload, code).await;

        self.pool.lock().free(code);
        result
    }

    async fn send_receive_with_code(
        &self,
        session: u8,
        typ: MessageType,
        payload: &str,
        code: u8,
    ) -> Result<ControlFrame, Error> {
        if let Some(frame) = self.cache.lock().remove(&code) {
            return Ok(frame);
        }

        self.send(session, typ, code, payload).await?;

        timeout(self.timeout, self.wait_for_code(code))
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn wait_for_code(&self, code: u8) -> Result<ControlFrame, Error> {
        loop {
            if let Some(frame) = self.cache.lock().remove(&code) {
                return Ok(frame);
            }

            let mut reader = self.reader.lock().await;
            let frame = self.receive_locked(&mut reader).await?;
            drop(reader);

            if frame.access_code == code {
                return Ok(frame);
            }

            self.cache.lock().insert(frame.access_code, frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_allocates_lowest_free_code() {
        let mut pool = AccessCodePool::new();
        assert_eq!(pool.alloc(), Some(1));
        assert_eq!(pool.alloc(), Some(2));
        pool.free(1);
        assert_eq!(pool.alloc(), Some(1));
    }

    #[test]
    fn pool_exhausts_after_255_allocations() {
        let mut pool = AccessCodePool::new();
        for _ in 1..256 {
            pool.alloc().expect("should still have codes free");
        }
        assert_eq!(pool.alloc(), None);
    }
}
