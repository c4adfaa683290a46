//! WebSocket gateway for voxrelay.
//!
//! The gateway accepts client connections, opens one orchestrator session per
//! connection, forwards binary audio frames into it and writes the session's
//! replies back as JSON text frames.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{build_router, serve, start_gateway};
pub use state::GatewayState;
