#[derive(Debug)]
pub enum RegistryError {
    /// No client id was unused after the configured number of retries.
    IdSpaceExhausted,
    /// No session id in 1..255 was free for both clients.
    SessionSpaceExhausted,
    NotFound,
}

impl std::error::Error for RegistryError {}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
