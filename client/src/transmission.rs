//! The peer UDP agent: binds an ephemeral socket, hole-punches to a peer's
//! public endpoint, and exposes fragmented display send/receive plus
//! single-datagram key events.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use yard_codec::datagram::DatagramType;
use yard_codec::transmission::TransmissionChannel;

use crate::error::ClientError;

/// Serializes a display fragment as a 4-byte big-endian descending index
/// followed by the chunk bytes — the portable replacement for the source's
/// native object pickling.
pub fn encode_fragment(index: u32, chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + chunk.len());
    out.extend_from_slice(&index.to_be_bytes());
    out.extend_from_slice(chunk);
    out
}

pub fn decode_fragment(body: &[u8]) -> Option<(u32, &[u8])> {
    if body.len() < 4 {
        return None;
    }
    let index = u32::from_be_bytes(body[..4].try_into().ok()?);
    Some((index, &body[4..]))
}

/// Accumulates display fragments by arrival order; a fragment with index 0
/// marks the last piece of an image and triggers reassembly in descending
/// index order. Loss of index 0 stalls delivery until the next index-0.
#[derive(Default)]
pub struct DisplayReassembler {
    fragments: HashMap<u32, Vec<u8>>,
}

impl DisplayReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, index: u32, chunk: &[u8]) -> Option<Vec<u8>> {
        self.fragments.insert(index, chunk.to_vec());
        if index != 0 {
            return None;
        }

        let mut indices: Vec<u32> = self.fragments.keys().copied().collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));

        let mut image = Vec::new();
        for i in indices {
            image.extend_from_slice(&self.fragments[&i]);
        }
        self.fragments.clear();
        Some(image)
    }
}

pub struct PeerUdpAgent {
    channel: TransmissionChannel,
    target: SocketAddr,
    dgram_size: usize,
}

impl PeerUdpAgent {
    pub fn new(channel: TransmissionChannel, target: SocketAddr, dgram_size: usize) -> Self {
        Self {
            channel,
            target,
            dgram_size,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.channel.local_addr()
    }

    /// Fragments `image` into datagrams of at most `dgram_size` bytes,
    /// numbered with a descending index so that index 0 marks the last
    /// fragment on the wire.
    pub async fn send_display(&self, image: &[u8]) -> Result<(), ClientError> {
        let count = image.len().div_ceil(self.dgram_size).max(1);

        let mut start = 0;
        for i in (0..count).rev() {
            let end = (start + self.dgram_size).min(image.len());
            let body = encode_fragment(i as u32, &image[start..end]);
            self.channel.send(self.target, DatagramType::Display, &body).await?;
            start = end;
        }

        Ok(())
    }

    pub async fn send_key(&self, payload: &[u8]) -> Result<(), ClientError> {
        self.channel.send(self.target, DatagramType::Key, payload).await?;
        Ok(())
    }

    /// Reads one datagram and feeds it to `reassembler`; returns the
    /// reassembled image once a fragment with index 0 arrives.
    pub async fn receive_display(
        &self,
        reassembler: &mut DisplayReassembler,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, ClientError> {
        let (typ, body, source) = self.channel.receive().await?;
        if typ != DatagramType::Display {
            return Ok(None);
        }

        let Some((index, chunk)) = decode_fragment(&body) else {
            return Ok(None);
        };

        Ok(reassembler.feed(index, chunk).map(|image| (image, source)))
    }

    pub async fn receive_key(&self) -> Result<Option<(Vec<u8>, SocketAddr)>, ClientError> {
        let (typ, body, source) = self.channel.receive().await?;
        if typ != DatagramType::Key {
            return Ok(None);
        }
        Ok(Some((body, source)))
    }

    /// Sprays `token` at the target every 2 seconds while concurrently
    /// listening; returns once a raw datagram carrying `token` arrives from
    /// the target address, then sprays ten more confirmation packets.
    pub async fn punch_hole(&self, token: &str) -> Result<(), ClientError> {
        let mut interval = tokio::time::interval(Duration::from_secs(2));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.channel.send_raw(self.target, token).await?;
                }
                received = self.channel.receive_raw() => {
                    let (body, source) = received?;
                    if source == self.target && body == token.as_bytes() {
                        break;
                    }
                }
            }
        }

        for _ in 0..10 {
            self.channel.send_raw(self.target, token).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_round_trips() {
        let body = encode_fragment(7, b"chunk");
        let (index, chunk) = decode_fragment(&body).unwrap();
        assert_eq!(index, 7);
        assert_eq!(chunk, b"chunk");
    }

    #[test]
    fn reassembles_in_descending_order() {
        let mut reassembler = DisplayReassembler::new();
        assert!(reassembler.feed(2, b"AAA").is_none());
        assert!(reassembler.feed(1, b"BBB").is_none());
        let image = reassembler.feed(0, b"CCC").unwrap();
        assert_eq!(image, b"AAABBBCCC");
    }

    #[test]
    fn tolerates_out_of_order_arrival() {
        let mut reassembler = DisplayReassembler::new();
        assert!(reassembler.feed(1, b"BBB").is_none());
        assert!(reassembler.feed(2, b"AAA").is_none());
        let image = reassembler.feed(0, b"CCC").unwrap();
        assert_eq!(image, b"AAABBBCCC");
    }

    #[test]
    fn partial_receipt_without_index_zero_yields_nothing() {
        let mut reassembler = DisplayReassembler::new();
        assert!(reassembler.feed(4, b"a").is_none());
        assert!(reassembler.feed(3, b"b").is_none());
        assert!(reassembler.feed(2, b"c").is_none());
        assert!(reassembler.feed(1, b"d").is_none());
    }

    #[test]
    fn clears_state_after_full_image_so_next_image_starts_fresh() {
        let mut reassembler = DisplayReassembler::new();
        reassembler.feed(1, b"x");
        reassembler.feed(0, b"y");

        let image = reassembler.feed(0, b"solo").unwrap();
        assert_eq!(image, b"solo");
    }
}
