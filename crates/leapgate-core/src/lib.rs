//! Core gateway logic: the persisted state store, the broker session
//! lifecycle, and the device operations exposed over HTTP.
//!
//! The layering mirrors the process structure. [`StateStore`] owns the
//! single JSON state file (credentials plus response cache).
//! [`SessionManager`] owns the one live broker session, reconnecting on
//! demand and running a keepalive watchdog beside each connection. The
//! [`ops`] module holds the read and command operations that execute
//! against whatever session the manager hands out.

pub mod error;
pub mod model;
pub mod ops;
pub mod session;
pub mod state;

pub use error::Error;
pub use session::{BrokerConnector, Session, SessionManager, SocketConnector};
pub use state::StateStore;
