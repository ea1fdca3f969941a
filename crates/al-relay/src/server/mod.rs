//! Client-facing WebSocket server

mod listener;
mod ws;

pub use listener::{router, RelayServer};
pub use ws::ws_handler;
