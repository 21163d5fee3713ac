//! Real-time messaging core for Ruggine: WebSocket gateway, presence
//! tracking and the message delivery/read lifecycle.

pub mod common;
pub mod server;
pub mod utils;
