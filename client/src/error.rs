#[derive(Debug)]
pub enum ClientError {
    /// A CONN sub-protocol line didn't parse: wrong command, wrong arity.
    BadSubProtocol,
    /// The peer's `expected_password`/`pending_password` didn't match ours.
    NotPermitted,
    Codec(yard_codec::Error),
    Io(std::io::Error),
}

impl std::error::Error for ClientError {}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<yard_codec::Error> for ClientError {
    fn from(value: yard_codec::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
