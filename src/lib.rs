//! OpenFin adapter - client for a locally running runtime's message bus.
//!
//! This crate connects to the runtime's WebSocket bus, performs the
//! authorization handshake, and exposes publish/subscribe and request/response
//! operations on top of it.
//!
//! # Architecture
//!
//! The crate follows a single-owner event loop pattern:
//!
//! - **Session** - owns the connection, runs the handshake, correlates acks
//! - **Dispatch** - wildcard subscription matching for pushed messages
//! - **Discovery** - optional runtime launch and port discovery over a local pipe
//! - **Client** - bus and system operations built on `Session::invoke`
//!
//! # Modules
//!
//! - [`session`] - Connection state machine and action invocation
//! - [`client`] - Public facade (bus + system operations)
//! - [`discovery`] - Launcher and discovery pipe protocol
//! - [`config`] - Configuration loading

// Library modules
pub mod client;
pub mod discovery;
pub mod dispatch;
pub mod key;
pub mod session;
pub mod ws;

pub mod config;
pub mod constants;
pub mod error;

// Re-export commonly used types
pub use client::system::{System, SystemAction};
pub use client::{Client, Registration, Unsubscribed};
pub use config::Config;
pub use dispatch::SubscriptionId;
pub use error::{SessionError, SessionResult};
pub use key::SubscriptionKey;
pub use session::{ConnectionState, Session, SessionOptions};
