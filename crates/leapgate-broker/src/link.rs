//! The duplex messaging capability the correlation layer is built on.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::envelope::Envelope;
use crate::error::Error;

/// Capacity of the inbound envelope broadcast channel.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// One established duplex connection to the broker.
///
/// A single link is shared by many concurrent logical calls: callers must
/// never assume exclusive access. Implementations fan every inbound
/// envelope out to every subscriber and record the first fatal error for
/// [`last_error`](Self::last_error) to report.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Send one envelope to the broker.
    ///
    /// Returns the link's fatal error if it has already failed.
    async fn send(&self, envelope: Envelope) -> Result<(), Error>;

    /// Subscribe to the inbound envelope stream.
    ///
    /// The receiver ends (returns `Closed`) once the link has died; a
    /// slow subscriber observes `Lagged` instead of blocking the link.
    fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>>;

    /// Close the link. Idempotent; safe to call on an errored link.
    async fn close(&self);

    /// The first fatal error observed on this link, if any.
    ///
    /// `None` means the link still claims to be healthy — which is not a
    /// guarantee: silent death is what the keepalive watchdog exists to
    /// catch.
    fn last_error(&self) -> Option<Error>;
}
