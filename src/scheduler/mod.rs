//! Background jobs

pub mod heartbeat;

pub use heartbeat::{HeartbeatEngine, HeartbeatState, DEFAULT_PASS_INTERVAL};
