//! WebSocket transport to the LEAP broker.
//!
//! [`LeapSocket`] implements [`BrokerLink`] over a TLS WebSocket. A writer
//! task serializes outgoing envelopes onto the socket; a reader task fans
//! inbound envelopes out to subscribers through a broadcast channel. The
//! first fatal error on either side is recorded and ends the link.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::auth::BrokerCredentials;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::link::{BrokerLink, INBOUND_CHANNEL_CAPACITY};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

// ── Shared socket state ──────────────────────────────────────────────

struct SocketShared {
    error: Mutex<Option<Error>>,
    inbound: Mutex<Option<broadcast::Sender<Arc<Envelope>>>>,
}

impl SocketShared {
    /// Record the first fatal error; later errors are dropped.
    fn record_error(&self, error: Error) {
        self.error
            .lock()
            .expect("error lock poisoned")
            .get_or_insert(error);
    }

    fn send_inbound(&self, envelope: Envelope) {
        if let Some(inbound) = self.inbound.lock().expect("inbound lock poisoned").as_ref() {
            // A send error just means no subscriber is listening right now.
            let _ = inbound.send(Arc::new(envelope));
        }
    }

    /// Drop the broadcast sender so every subscriber's stream ends.
    fn drop_inbound(&self) {
        self.inbound.lock().expect("inbound lock poisoned").take();
    }
}

// ── LeapSocket ───────────────────────────────────────────────────────

/// An authenticated WebSocket connection to the broker.
pub struct LeapSocket {
    outbound: mpsc::Sender<Envelope>,
    shared: Arc<SocketShared>,
    cancel: CancellationToken,
}

impl LeapSocket {
    /// Open a WebSocket to the broker described by `credentials`,
    /// presenting its access token on the upgrade request.
    ///
    /// Callers wanting a handshake deadline wrap this in a timeout; the
    /// session layer does.
    pub async fn connect(credentials: &BrokerCredentials) -> Result<Arc<Self>, Error> {
        let uri: tungstenite::http::Uri = credentials
            .broker_url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::transport(e))?;

        debug!(url = %credentials.broker_url, "connecting to broker");
        let request = ClientRequestBuilder::new(uri).with_header(
            "Authorization",
            format!("Bearer {}", credentials.access_token),
        );

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::transport(e))?;
        debug!("broker WebSocket connected");

        let (write, read) = ws.split();
        let (inbound, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let shared = Arc::new(SocketShared {
            error: Mutex::new(None),
            inbound: Mutex::new(Some(inbound)),
        });
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(
            write,
            outbound_rx,
            Arc::clone(&shared),
            cancel.clone(),
        ));
        tokio::spawn(read_loop(read, Arc::clone(&shared), cancel.clone()));

        Ok(Arc::new(Self {
            outbound,
            shared,
            cancel,
        }))
    }
}

#[async_trait]
impl BrokerLink for LeapSocket {
    async fn send(&self, envelope: Envelope) -> Result<(), Error> {
        if let Some(error) = self.last_error() {
            return Err(error);
        }
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| self.last_error().unwrap_or(Error::LinkClosed))
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        match self
            .shared
            .inbound
            .lock()
            .expect("inbound lock poisoned")
            .as_ref()
        {
            Some(inbound) => inbound.subscribe(),
            None => {
                // Link already dead: hand back a receiver that ends at once.
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            }
        }
    }

    async fn close(&self) {
        self.shared.record_error(Error::LinkClosed);
        self.cancel.cancel();
    }

    fn last_error(&self) -> Option<Error> {
        self.shared.error.lock().expect("error lock poisoned").clone()
    }
}

// ── Writer task ──────────────────────────────────────────────────────

async fn write_loop<S>(
    mut write: S,
    mut outbound: mpsc::Receiver<Envelope>,
    shared: Arc<SocketShared>,
    cancel: CancellationToken,
) where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            maybe = outbound.recv() => {
                let Some(envelope) = maybe else { break };
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(error = %error, "dropping unserializable envelope");
                        continue;
                    }
                };
                trace!(url = %envelope.header.url, "sending envelope");
                if let Err(error) = write.send(Message::Text(text.into())).await {
                    shared.record_error(Error::transport(&error));
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    // Best-effort close frame; the connection may already be gone.
    let _ = write.close().await;
    trace!("broker writer exited");
}

// ── Reader task ──────────────────────────────────────────────────────

async fn read_loop<S>(mut read: S, shared: Arc<SocketShared>, cancel: CancellationToken)
where
    S: StreamExt<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => shared.send_inbound(envelope),
                            Err(error) => {
                                warn!(error = %error, "ignoring unparseable broker frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers pongs automatically.
                        trace!("broker ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "no reason given".into());
                        shared.record_error(Error::Transport(format!(
                            "connection closed by broker: {reason}"
                        )));
                        break;
                    }
                    Some(Err(error)) => {
                        shared.record_error(Error::transport(&error));
                        break;
                    }
                    None => {
                        shared.record_error(Error::LinkClosed);
                        break;
                    }
                    _ => {
                        // Binary, Pong, raw frames — not part of LEAP.
                    }
                }
            }
        }
    }
    shared.drop_inbound();
    cancel.cancel();
    trace!("broker reader exited");
}
