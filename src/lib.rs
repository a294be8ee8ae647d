pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod fsm;
pub mod packstream;
pub mod protocol;
pub mod server;
pub mod status;

pub use cli::{Command, prompt};
pub use client::Client;
pub use config::ServerConfig;
pub use server::Server;
