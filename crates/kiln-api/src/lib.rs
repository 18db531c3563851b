//! API server for Kiln.
//!
//! Provides the HTTP REST API, the live build log WebSocket and the
//! in-process fan-out that feeds it.

pub mod error;
pub mod fanout;
pub mod routes;
pub mod state;
pub mod ws;

pub use fanout::{LogFanout, Subscription};
pub use state::AppState;
