//! Server configuration.
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
};

use crate::{
    backend::{Backend, memory::MemoryBackend},
    protocol::transport::{DEFAULT_MAX_MESSAGE_SIZE, MAX_CHUNK_SIZE},
};

pub const DEFAULT_PORT: u16 = 7687;
pub const DEFAULT_WORKERS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    /// Each connection occupies one worker for as long as it is open.
    pub workers: usize,
    /// Reported as `server` in the HELLO response.
    pub server_agent: String,
    /// `(name, password)` pairs accepted by basic authentication.
    pub users: Vec<(String, String)>,
    pub allow_anonymous: bool,
    pub max_chunk_size: usize,
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            workers: DEFAULT_WORKERS,
            server_agent: concat!("boltd/", env!("CARGO_PKG_VERSION")).to_string(),
            users: Vec::new(),
            allow_anonymous: false,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// An in-memory backend knowing the configured users, advertising this
    /// server's address in routing tables.
    pub fn memory_backend(&self) -> Backend {
        let backend = self
            .users
            .iter()
            .fold(MemoryBackend::new(self.address.to_string()), |backend, (name, password)| {
                backend.with_user(name.as_str(), password.as_str())
            })
            .allow_anonymous(self.allow_anonymous);
        let backend = Arc::new(backend);
        Backend::new(backend.clone(), backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::AuthToken;

    #[test]
    fn default_listens_on_localhost() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), DEFAULT_PORT);
        assert!(config.address.ip().is_loopback());
        assert!(config.server_agent.starts_with("boltd/"));
    }

    #[test]
    fn memory_backend_knows_configured_users() {
        let config = ServerConfig {
            users: vec![("neo".into(), "secret".into())],
            ..ServerConfig::default()
        };
        let backend = config.memory_backend();
        assert!(backend.auth.authenticate(&AuthToken::basic("neo", "secret")).is_ok());
        assert!(backend.auth.authenticate(&AuthToken::basic("neo", "wrong")).is_err());
        assert!(backend.auth.authenticate(&AuthToken::none()).is_err());
    }
}
