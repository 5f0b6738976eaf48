#![forbid(unsafe_code)]

//! Probe for app-server style agent backends speaking JSON-RPC over stdio.
//!
//! Launches the peer, performs the `initialize` / `thread/start` handshake,
//! runs turns, and reassembles the streamed reply from notifications.

pub mod config;
pub mod errors;
pub mod rpc;
pub mod session;

pub use config::ProbeConfig;
pub use errors::{AppError, Result};
pub use session::{TurnOutcome, TurnSession, TurnStatus};
