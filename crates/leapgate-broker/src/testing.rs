//! In-memory broker link for exercising the correlation and session
//! layers without a network.
//!
//! Enabled for downstream crates via the `testing` feature.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::envelope::{Envelope, Header};
use crate::error::Error;
use crate::link::{BrokerLink, INBOUND_CHANNEL_CAPACITY};

type Responder = Box<dyn Fn(&Envelope) -> Option<Envelope> + Send + Sync>;

/// A [`BrokerLink`] backed by channels.
///
/// Records every sent envelope. Tests either [`push`](Self::push) inbound
/// envelopes manually or install an auto-responder with
/// [`respond_with`](Self::respond_with).
pub struct FakeLink {
    sent: Mutex<Vec<Envelope>>,
    inbound: Mutex<Option<broadcast::Sender<Arc<Envelope>>>>,
    error: Mutex<Option<Error>>,
    responder: Mutex<Option<Responder>>,
}

impl FakeLink {
    pub fn new() -> Arc<Self> {
        let (inbound, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(Some(inbound)),
            error: Mutex::new(None),
            responder: Mutex::new(None),
        })
    }

    /// Auto-answer every sent envelope. Return `None` to stay silent for
    /// that request (e.g. to force a timeout).
    pub fn respond_with(&self, f: impl Fn(&Envelope) -> Option<Envelope> + Send + Sync + 'static) {
        *self.responder.lock().expect("responder lock") = Some(Box::new(f));
    }

    /// Deliver an inbound envelope to all subscribers.
    pub fn push(&self, envelope: Envelope) {
        if let Some(inbound) = self.inbound.lock().expect("inbound lock").as_ref() {
            let _ = inbound.send(Arc::new(envelope));
        }
    }

    /// Every envelope sent over this link, in order.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().expect("sent lock").clone()
    }

    /// The URLs of every sent envelope, in order.
    pub fn sent_urls(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|envelope| envelope.header.url)
            .collect()
    }

    /// Mark the link fatally errored, as the transport would, and end the
    /// inbound stream.
    pub fn fail(&self, error: Error) {
        self.error.lock().expect("error lock").get_or_insert(error);
        self.inbound.lock().expect("inbound lock").take();
    }
}

#[async_trait]
impl BrokerLink for FakeLink {
    async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        if let Some(error) = self.last_error() {
            return Err(error);
        }
        self.sent.lock().expect("sent lock").push(envelope.clone());

        let response = self
            .responder
            .lock()
            .expect("responder lock")
            .as_ref()
            .and_then(|respond| respond(&envelope));
        if let Some(response) = response {
            self.push(response);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        match self.inbound.lock().expect("inbound lock").as_ref() {
            Some(inbound) => inbound.subscribe(),
            None => {
                // Already closed: hand back a receiver that ends at once.
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            }
        }
    }

    async fn close(&self) {
        self.fail(Error::LinkClosed);
    }

    fn last_error(&self) -> Option<Error> {
        self.error.lock().expect("error lock").clone()
    }
}

/// Build a response envelope answering `request`, echoing its tag and URL.
pub fn response_to(request: &Envelope, communique_type: &str, body: serde_json::Value) -> Envelope {
    Envelope {
        communique_type: communique_type.into(),
        header: Header {
            client_tag: request.header.client_tag.clone(),
            url: request.header.url.clone(),
        },
        body: Some(body),
    }
}
