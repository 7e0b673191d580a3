//! Realtime channel between the ticket bot control panel and its backend.
//!
//! A [`Channel`] owns one websocket to the backend: requests go out as
//! tagged JSON objects, replies land in a bounded [`InboundBuffer`] that
//! consumers scan by `action`. [`Provider`] shares one channel across a
//! whole panel and keeps the account list and bot status fresh.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod poller;
pub mod provider;
pub mod server;
pub mod types;

#[cfg(test)]
mod tests;

pub use buffer::{InboundBuffer, DEFAULT_CAPACITY};
pub use channel::{Channel, ConnectionState, Sender};
pub use error::{ChannelError, DecodeError};
pub use poller::Poller;
pub use provider::{PanelState, Provider, ProviderOptions};
pub use types::{InboundMessage, OutboundRequest};
