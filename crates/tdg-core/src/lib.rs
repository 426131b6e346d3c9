//! tdg-core: Shared protocol library for the Trading Data Gateway.
//!
//! Provides the JSON array frame codec, the closed command set, upstream
//! auth payload signing, and market data models shared by the server and
//! its tests.

pub mod auth;
pub mod command;
pub mod error;
pub mod frame;
pub mod market;

// Re-export commonly used items at crate root.
pub use command::{Command, CommandName};
pub use error::{TdgError, TdgResult};
pub use frame::{frame_decode, frame_encode, TAG_BFX, TAG_CONNECTED, TAG_ERROR};
pub use market::{Candle, Market, Trade};
