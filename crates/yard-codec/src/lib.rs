//! Wire codecs for the YARD signaling and transmission protocols.
//!
//! Two independent framings share a single host:port pair: the control
//! channel is a reliable byte stream carrying text commands inside a fixed
//! 6-byte header ([`control`]), and the transmission channel is UDP datagrams
//! carrying display/input payloads inside a fixed 5-byte header
//! ([`datagram`]). [`channel`] and [`transmission`] wrap the two codecs with
//! the async send/receive/correlation behavior the server and peer agents
//! both depend on.

pub mod channel;
pub mod control;
pub mod datagram;
pub mod transmission;

use std::array::TryFromSliceError;
use std::str::Utf8Error;

#[derive(Debug)]
pub enum Error {
    /// Header failed a structural check (bad version, type, or length).
    InvalidHeader,
    /// Payload bytes were not valid UTF-8 where text was required.
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
    /// Payload would not fit in the 2-byte length field.
    PayloadTooLarge,
    /// The stream was closed while a read or write was in flight.
    ConnectionAborted,
    /// No access code was free to allocate.
    ResourceExhausted,
    /// A `send_receive` call did not see its reply within the deadline.
    Timeout,
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionAborted
        } else {
            Self::Io(value)
        }
    }
}
