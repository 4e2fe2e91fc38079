//! In-memory client and session directory for the YARD server.
//!
//! Clients, sessions, and pending frames form the cyclic
//! client-session-client graph described by the server's data model. The
//! cycle is resolved the way the rest of this codebase resolves owned
//! graphs with a shared backing table: entities reference each other by key
//! (`ClientId`, a small session id) and every lookup goes through
//! [`ClientRegistry`].

pub mod client;
pub mod error;
pub mod registry;
pub mod session;

pub type ClientId = String;

pub use client::{Client, ConnId, PendingFrame};
pub use error::RegistryError;
pub use registry::ClientRegistry;
pub use session::Session;
