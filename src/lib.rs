#![forbid(unsafe_code)]

//! `tether` — persistent-connection control channel.
//!
//! A daemon accepts long-lived agent connections, tracks liveness through
//! a heartbeat, and lets an operator broadcast or target commands from a
//! local console or the bridge socket.

pub mod agent;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod heartbeat;
pub mod protocol;
pub mod registry;
pub mod server;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
