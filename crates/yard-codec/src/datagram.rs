//! The transmission-channel datagram header: a fixed 5-byte little-endian
//! header, `version(1) | type(1) | reserved(3)`, followed by a type-specific
//! body. `DISPLAY` bodies carry a fragment as a 4-byte big-endian descending
//! index followed by the chunk bytes (see [`crate::transmission`]); `KEY`
//! bodies are a single opaque blob.

use bytes::{BufMut, BytesMut};

use super::Error;

pub const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatagramType {
    Close = 0,
    Display = 1,
    Key = 2,
}

impl DatagramType {
    fn from_u8(value: u8) -> Result<Self, Error> {
        Ok(match value {
            0 => Self::Close,
            1 => Self::Display,
            2 => Self::Key,
            _ => return Err(Error::InvalidHeader),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DatagramHeader {
    pub typ: DatagramType,
}

impl DatagramHeader {
    /// # Test
    ///
    /// ```
    /// use yard_codec::datagram::{DatagramHeader, DatagramType};
    ///
    /// let bytes = DatagramHeader { typ: DatagramType::Key }.encode();
    /// let header = DatagramHeader::decode(&bytes).unwrap();
    /// assert_eq!(header.typ, DatagramType::Key);
    /// ```
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, Error> {
        if bytes[0] != 0 {
            return Err(Error::InvalidHeader);
        }

        Ok(Self {
            typ: DatagramType::from_u8(bytes[1])?,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = 0;
        bytes[1] = self.typ as u8;
        bytes
    }
}

pub struct DatagramFrame<'a> {
    pub typ: DatagramType,
    pub body: &'a [u8],
}

impl<'a> DatagramFrame<'a> {
    pub fn encode(&self, bytes: &mut BytesMut) {
        bytes.put_slice(&DatagramHeader { typ: self.typ }.encode());
        bytes.put_slice(self.body);
    }

    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use yard_codec::datagram::{DatagramFrame, DatagramType};
    ///
    /// let mut bytes = BytesMut::new();
    /// DatagramFrame { typ: DatagramType::Key, body: b"payload" }.encode(&mut bytes);
    ///
    /// let frame = DatagramFrame::decode(&bytes).unwrap();
    /// assert_eq!(frame.typ, DatagramType::Key);
    /// assert_eq!(frame.body, b"payload");
    /// ```
    pub fn decode(bytes: &'a [u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidHeader);
        }

        let header_bytes: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into()?;
        let header = DatagramHeader::decode(&header_bytes)?;

        Ok(Self {
            typ: header.typ,
            body: &bytes[HEADER_LEN..],
        })
    }
}
