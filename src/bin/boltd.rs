use std::{error::Error, net::SocketAddr};

use boltd::{
    config::{DEFAULT_WORKERS, ServerConfig},
    server::Server,
};
use clap::Parser;
use log::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(long, env = "BOLTD_ADDRESS", default_value = "127.0.0.1:7687")]
    address: SocketAddr,
    /// Number of connections served at the same time
    #[arg(long, env = "BOLTD_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// Accepted credentials as `name:password`; repeat or separate with commas
    #[arg(long = "user", env = "BOLTD_USERS", value_delimiter = ',', value_parser = parse_user)]
    users: Vec<(String, String)>,
    /// Accept the `none` authentication scheme
    #[arg(long, env = "BOLTD_ALLOW_ANONYMOUS")]
    allow_anonymous: bool,
    /// Server agent reported to clients
    #[arg(long, env = "BOLTD_SERVER_AGENT")]
    server_agent: Option<String>,
    /// Largest chunk written back to clients
    #[arg(long, env = "BOLTD_MAX_CHUNK_SIZE", default_value_t = u16::MAX,
          value_parser = clap::value_parser!(u16).range(1..))]
    max_chunk_size: u16,
}

fn parse_user(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, password)| (name.to_string(), password.to_string()))
        .ok_or_else(|| format!("expected name:password, found '{s}'"))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let defaults = ServerConfig::default();
    let config = ServerConfig {
        address: cli.address,
        workers: cli.workers,
        server_agent: cli.server_agent.unwrap_or(defaults.server_agent.clone()),
        users: cli.users,
        allow_anonymous: cli.allow_anonymous,
        max_chunk_size: cli.max_chunk_size.into(),
        ..defaults
    };
    if config.users.is_empty() && !config.allow_anonymous {
        warn!("no users configured and anonymous access is off; every login will fail");
    }

    let server = Server::new(config.clone(), config.memory_backend())?;
    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("interrupted, stopping");
        handle.shutdown();
    })?;

    server.listen()?;
    Ok(())
}
