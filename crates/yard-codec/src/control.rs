//! The control-channel frame: a fixed 6-byte header followed by a UTF-8 text
//! payload.
//!
//! ```text
//! offset | field        | width | meaning
//!      0 | version      | 1     | must equal 0
//!      1 | session      | 1     | 0 for session-independent messages
//!      2 | type         | 1     | MessageType
//!      3 | access_code  | 1     | 0 unsolicited, else 1..255
//!      4 | payload_len  | 2     | little-endian, 0..65535
//! ```

use bytes::{BufMut, BytesMut};

use super::Error;

pub const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Close = 0,
    Init = 1,
    Ping = 2,
    Req = 3,
    Conn = 4,
    Term = 5,
    Ren = 6,
    Ans = 7,
    Err = 8,
    Warn = 9,
}

impl MessageType {
    fn from_u8(value: u8) -> Result<Self, Error> {
        Ok(match value {
            0 => Self::Close,
            1 => Self::Init,
            2 => Self::Ping,
            3 => Self::Req,
            4 => Self::Conn,
            5 => Self::Term,
            6 => Self::Ren,
            7 => Self::Ans,
            8 => Self::Err,
            9 => Self::Warn,
            _ => return Err(Error::InvalidHeader),
        })
    }
}

/// Decoded header plus the byte length of the payload that follows it on
/// the wire. The payload itself is read separately, once the caller knows
/// how many bytes to expect.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub session: u8,
    pub typ: MessageType,
    pub access_code: u8,
    pub payload_len: u16,
}

impl Header {
    /// # Test
    ///
    /// ```
    /// use yard_codec::control::{Header, MessageType};
    ///
    /// let bytes = Header { session: 1, typ: MessageType::Ping, access_code: 3, payload_len: 0 }.encode();
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.session, 1);
    /// assert_eq!(header.typ, MessageType::Ping);
    /// assert_eq!(header.access_code, 3);
    /// ```
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, Error> {
        if bytes[0] != 0 {
            return Err(Error::InvalidHeader);
        }

        Ok(Self {
            session: bytes[1],
            typ: MessageType::from_u8(bytes[2])?,
            access_code: bytes[3],
            payload_len: u16::from_le_bytes(bytes[4..6].try_into()?),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = 0;
        bytes[1] = self.session;
        bytes[2] = self.typ as u8;
        bytes[3] = self.access_code;
        bytes[4..6].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes
    }
}

/// A complete control frame, header and text payload together.
pub struct ControlFrame {
    pub session: u8,
    pub typ: MessageType,
    pub access_code: u8,
    pub payload: String,
}

impl ControlFrame {
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use yard_codec::control::{ControlFrame, MessageType};
    ///
    /// let frame = ControlFrame { session: 0, typ: MessageType::Init, access_code: 1, payload: "hello".into() };
    /// let mut bytes = BytesMut::new();
    /// frame.encode(&mut bytes).unwrap();
    /// assert_eq!(bytes.len(), 6 + 5);
    /// ```
    pub fn encode(&self, bytes: &mut BytesMut) -> Result<(), Error> {
        if self.payload.len() > u16::MAX as usize {
            return Err(Error::PayloadTooLarge);
        }

        let header = Header {
            session: self.session,
            typ: self.typ,
            access_code: self.access_code,
            payload_len: self.payload.len() as u16,
        };

        bytes.put_slice(&header.encode());
        bytes.put_slice(self.payload.as_bytes());
        Ok(())
    }

    pub fn from_parts(header: Header, payload: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            session: header.session,
            typ: header.typ,
            access_code: header.access_code,
            payload: std::str::from_utf8(payload)?.to_owned(),
        })
    }
}
