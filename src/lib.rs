//! Graceful shutdown for a listening HTTP server.
//!
//! A [`Server`] tracks how many requests are in flight on every accepted
//! connection. Stopping it closes the listener, ends idle connections at
//! once, lets busy ones finish their exchanges, and, when a grace period
//! is configured, destroys whatever is still open once it elapses.

pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod tracker;

pub use connection::{Connection, ConnectionHandle, ConnectionId};
pub use error::{ListenerError, ServerError, ShutdownError, ERR_SERVER_NOT_RUNNING};
pub use listener::{DynListener, Listener};
pub use registry::ConnectionRegistry;
pub use server::Server;
pub use shutdown::{Completion, ShutdownCoordinator, ShutdownState};
pub use tracker::{ActivityTracker, InFlight};
