//! Async client for the Lutron LEAP cloud broker.
//!
//! This crate owns the protocol layer of the leapgate workspace:
//!
//! - **[`Envelope`]** — the LEAP message unit (`CommuniqueType` + addressing
//!   header + optional JSON body), with [`Request`] as the outgoing template
//!   that is missing only its correlation tag.
//!
//! - **[`BrokerLink`]** — the duplex messaging capability the correlation
//!   layer is built on: `send` one envelope, `subscribe` to the inbound
//!   stream, observe the link's first fatal error. [`LeapSocket`] is the
//!   production implementation over a TLS WebSocket.
//!
//! - **[`CorrelatedClient`]** — multiplexes many concurrent logical requests
//!   over one shared link by minting a per-request correlation tag and
//!   matching response envelopes back through a tag-keyed registry. Includes
//!   [`read_many`](CorrelatedClient::read_many) for concurrent batch reads.
//!
//! - **[`CloudAuthenticator`]** — mints [`BrokerCredentials`] through the
//!   Lutron cloud exchange (OAuth token → device list → broker list →
//!   broker authenticate), behind the [`CredentialMinter`] trait.
//!
//! Session lifecycle (reconnect, cooldown, keepalive) lives one layer up in
//! `leapgate-core`.

pub mod auth;
pub mod correlate;
pub mod envelope;
pub mod error;
pub mod link;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::{BrokerCredentials, CloudAuthenticator, CredentialMinter};
pub use correlate::{CorrelatedClient, Matcher};
pub use envelope::{Envelope, Header, Request};
pub use error::Error;
pub use link::BrokerLink;
pub use transport::LeapSocket;
