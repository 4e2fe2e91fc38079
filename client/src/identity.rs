//! The single per-peer JSON document holding this client's fingerprint,
//! created on first run and reused across restarts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Identity {
    pub fingerprint: Uuid,
}

impl Identity {
    /// Loads the identity at `path`, creating a fresh v4 fingerprint and
    /// writing it there if the file doesn't exist yet.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self {
                    fingerprint: Uuid::new_v4(),
                };
                let text = serde_json::to_string_pretty(&identity)?;
                std::fs::write(path, text)?;
                log::info!("created new identity at {}", path.display());
                Ok(identity)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_persists_across_calls() {
        let dir = std::env::temp_dir().join(format!("yard-identity-test-{}", Uuid::new_v4()));
        let path = dir.join("identity.json");
        std::fs::create_dir_all(&dir).unwrap();

        let first = Identity::load_or_create(&path).unwrap();
        let second = Identity::load_or_create(&path).unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);

        std::fs::remove_dir_all(&dir).ok();
    }
}
