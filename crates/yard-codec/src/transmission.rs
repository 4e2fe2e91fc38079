//! The transmission channel: datagram send/receive plus "raw" (headerless)
//! send/receive used during UDP rendezvous and hole-punching.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::net::UdpSocket;

use crate::Error;
use crate::datagram::{DatagramFrame, DatagramType};

/// Default MTU-ish cap on a single outgoing datagram.
pub const DEFAULT_DGRAM_SIZE: usize = 1000;

pub struct TransmissionChannel {
    socket: UdpSocket,
    buffer_len: usize,
}

impl TransmissionChannel {
    pub fn new(socket: UdpSocket, buffer_len: usize) -> Self {
        Self { socket, buffer_len }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends one framed datagram to `target`.
    pub async fn send(&self, target: SocketAddr, typ: DatagramType, body: &[u8]) -> Result<(), Error> {
        let mut bytes = BytesMut::with_capacity(self.buffer_len);
        DatagramFrame { typ, body }.encode(&mut bytes);
        self.socket.send_to(&bytes, target).await?;
        Ok(())
    }

    /// Sends a bare token with no header, used for rendezvous pings and
    /// hole-punch packets.
    pub async fn send_raw(&self, target: SocketAddr, token: &str) -> Result<(), Error> {
        self.socket.send_to(token.as_bytes(), target).await?;
        Ok(())
    }

    /// Reads one framed datagram, returning the frame type, its body, and
    /// the source address.
    pub async fn receive(&self) -> Result<(DatagramType, Vec<u8>, SocketAddr), Error> {
        let mut buf = vec![0u8; self.buffer_len];
        let (n, source) = self.socket.recv_from(&mut buf).await?;
        let frame = DatagramFrame::decode(&buf[..n])?;
        Ok((frame.typ, frame.body.to_vec(), source))
    }

    /// Reads one unframed datagram, returning its raw bytes and source.
    pub async fn receive_raw(&self) -> Result<(Vec<u8>, SocketAddr), Error> {
        let mut buf = vec![0u8; self.buffer_len];
        let (n, source) = self.socket.recv_from(&mut buf).await?;
        Ok((buf[..n].to_vec(), source))
    }
}
