//! Transport implementations

pub mod http;
pub mod stdio;
pub mod websocket;
