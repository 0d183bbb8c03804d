//! Config module - server configuration

pub mod server;

pub use server::ServerConfig;
