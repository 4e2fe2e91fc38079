use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7777
}

fn default_id_len() -> usize {
    8
}

fn default_password_len() -> usize {
    32
}

fn default_buffer() -> usize {
    1000
}

fn default_rendezvous_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Ssl {
    pub cert: Option<String>,
    pub key: Option<String>,
    pub subject: Option<String>,
}

impl Default for Ssl {
    fn default() -> Self {
        Self {
            cert: None,
            key: None,
            subject: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Server {
    pub hostname: String,
    pub port: u16,
    pub id_len: usize,
    pub password_len: usize,
    pub rendezvous_timeout_secs: u64,
    pub ssl: Ssl,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            id_len: default_id_len(),
            password_len: default_password_len(),
            rendezvous_timeout_secs: default_rendezvous_timeout_secs(),
            ssl: Ssl::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Transmission {
    pub buffer: usize,
}

impl Default for Transmission {
    fn default() -> Self {
        Self {
            buffer: default_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Log {
    pub level: LogLevel,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub transmission: Transmission,
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(name = "yard-server", about = "YARD signaling and rendezvous server")]
struct Cli {
    /// Path to a JSON5 configuration file. Missing keys fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let cli = Cli::parse();
        match cli.config {
            Some(path) => Ok(serde_json5::from_str(&std::fs::read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_all_defaults() {
        let config: Config = serde_json5::from_str("{}").unwrap();
        assert_eq!(config.server.hostname, "127.0.0.1");
        assert_eq!(config.server.port, 7777);
        assert_eq!(config.server.id_len, 8);
        assert_eq!(config.transmission.buffer, 1000);
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn partial_document_overrides_only_given_keys() {
        let config: Config = serde_json5::from_str("{ server: { port: 9000 } }").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.hostname, "127.0.0.1");
    }
}
