//! Luminous - Operator Dashboard Backend Library
//! Persists the dashboard state snapshot and keeps the memory library tidy

// Remote key-value store
pub mod kv;

// State snapshot sync and memory library
pub mod memory;

// Autonomous background passes
pub mod scheduler;

// Third-party API proxies
pub mod proxy;

// Configuration and HTTP server
pub mod config;
pub mod server;
