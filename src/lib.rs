//! cmdlink library
//!
//! Line-oriented remote command transport. A `Listener` accepts TCP clients and
//! runs one `Session` per connection; a `Connector` proves it runs as the
//! listener's user by reading a challenge file, then exchanges tagged lines.

pub mod challenge;
pub mod cli;
pub mod client;
pub mod config;
pub mod connections;
pub mod error;
pub mod listener;
pub mod logger;
pub mod protocol;
pub mod protocol_core;
pub mod registry;
pub mod session;
pub mod transfer;
pub mod web;

pub use client::Connector;
pub use error::{LinkError, Result};
pub use listener::{Listener, ListenerState};
pub use registry::{CommandRegistry, Handlers, WebRegistry};
