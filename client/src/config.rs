use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "yard-client", about = "YARD peer signaling and UDP transmission agent")]
pub struct Cli {
    /// host:port of the YARD server's control listener.
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub server: String,

    /// Where this peer's persisted fingerprint lives.
    #[arg(long, default_value = "./yard-identity.json")]
    pub identity_file: PathBuf,

    /// Per-socket send/recv buffer and datagram size upper bound.
    #[arg(long, default_value_t = 1000)]
    pub buffer: usize,

    /// Length of a locally generated session password, when this peer
    /// originates a CONN INIT.
    #[arg(long, default_value_t = 32)]
    pub password_len: usize,

    /// Target client id to call on startup. Omit to just sit and wait for
    /// incoming CONNs.
    #[arg(long)]
    pub call: Option<String>,

    /// Password this peer expects from a caller (and sends when it is the
    /// caller). Out-of-band agreement between the two users is assumed.
    #[arg(long)]
    pub password: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
