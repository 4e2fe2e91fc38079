/// The control-dispatch error taxonomy. Framing and protocol violations are
/// fatal to the stream; the rest are reported to the caller and the stream
/// continues. Variants that can be raised from more than one call site carry
/// their own wire text rather than a single canned message per variant.
#[derive(Debug)]
pub enum ServerError {
    FormatError(&'static str),
    NotInitialized,
    SessionMissing(&'static str),
    PeerOffline(&'static str),
    ResourceExhausted(&'static str),
    Timeout,
    ConnectionAborted,
}

impl std::error::Error for ServerError {}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FormatError(msg) | Self::SessionMissing(msg) | Self::PeerOffline(msg) | Self::ResourceExhausted(msg) => {
                write!(f, "{msg}")
            }
            Self::NotInitialized => write!(f, "Not initialized"),
            Self::Timeout => write!(f, "Timed out"),
            Self::ConnectionAborted => write!(f, "Connection aborted"),
        }
    }
}

impl From<yard_registry::RegistryError> for ServerError {
    fn from(value: yard_registry::RegistryError) -> Self {
        match value {
            yard_registry::RegistryError::IdSpaceExhausted => Self::ResourceExhausted("No client id available"),
            yard_registry::RegistryError::SessionSpaceExhausted => Self::ResourceExhausted("No session id available"),
            yard_registry::RegistryError::NotFound => Self::SessionMissing("Unknown session"),
        }
    }
}

impl From<yard_codec::Error> for ServerError {
    fn from(value: yard_codec::Error) -> Self {
        match value {
            yard_codec::Error::ConnectionAborted => Self::ConnectionAborted,
            yard_codec::Error::Timeout => Self::Timeout,
            _ => Self::FormatError("Malformed frame"),
        }
    }
}
