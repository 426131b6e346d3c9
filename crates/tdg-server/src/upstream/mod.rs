//! Connections to the upstream venue: streaming WebSocket sessions and
//! the shared REST client.

pub mod rest;
pub mod ws;

pub use rest::RestClient;
pub use ws::{UpstreamEvent, UpstreamSession};
