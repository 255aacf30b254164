//! Broker session lifecycle.
//!
//! The gateway holds at most one live broker session. [`SessionManager`]
//! hands it out on demand, reconnecting lazily when the previous session
//! died and refusing to hammer the identity provider by replaying the
//! last failure during a cooldown window. Each live session gets a
//! keepalive watchdog that probes the broker and tears the session down
//! when the probe fails, so the next caller triggers a clean reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leapgate_broker::{BrokerCredentials, BrokerLink, CorrelatedClient, CredentialMinter, LeapSocket};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::state::StateStore;

/// Deadline for one full reconnect attempt, credential minting
/// included, and for the WebSocket handshake on its own.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum spacing between reconnect attempts after a failure. Within
/// this window callers get the recorded failure back verbatim.
pub const MIN_REAUTH_INTERVAL: Duration = Duration::from_secs(300);

/// Spacing between keepalive probes on a live session.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Deadline for a single keepalive probe.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker endpoint the keepalive probe reads.
pub const PING_URL: &str = "/server/1/status/ping";

// ── Session ──────────────────────────────────────────────────────────

/// One live, authenticated broker connection with its correlated client.
pub struct Session {
    link: Arc<dyn BrokerLink>,
    client: CorrelatedClient,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(link: Arc<dyn BrokerLink>) -> Arc<Self> {
        let client = CorrelatedClient::new(Arc::clone(&link));
        Arc::new(Self { link, client })
    }

    pub fn client(&self) -> &CorrelatedClient {
        &self.client
    }

    /// A session is healthy until its link records a fatal error.
    pub fn healthy(&self) -> bool {
        self.link.last_error().is_none()
    }

    pub fn last_error(&self) -> Option<leapgate_broker::Error> {
        self.link.last_error()
    }

    async fn close(&self) {
        self.link.close().await;
    }
}

// ── Connector ────────────────────────────────────────────────────────

/// Opens a broker link from credentials. Abstracted so session tests can
/// substitute an in-memory link.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn open(
        &self,
        credentials: &BrokerCredentials,
    ) -> Result<Arc<dyn BrokerLink>, leapgate_broker::Error>;
}

/// Production connector: a TLS WebSocket with a handshake deadline.
pub struct SocketConnector;

#[async_trait]
impl BrokerConnector for SocketConnector {
    async fn open(
        &self,
        credentials: &BrokerCredentials,
    ) -> Result<Arc<dyn BrokerLink>, leapgate_broker::Error> {
        let socket = tokio::time::timeout(CONNECT_TIMEOUT, LeapSocket::connect(credentials))
            .await
            .map_err(|_| leapgate_broker::Error::Timeout {
                url: credentials.broker_url.to_string(),
            })??;
        Ok(socket)
    }
}

// ── SessionManager ───────────────────────────────────────────────────

struct ReconnectFailure {
    error: Error,
    at: Instant,
}

struct Shared {
    session: Option<Arc<Session>>,
    failure: Option<ReconnectFailure>,
    watchdog: CancellationToken,
}

struct Inner {
    store: Arc<StateStore>,
    minter: Arc<dyn CredentialMinter>,
    connector: Arc<dyn BrokerConnector>,
    shared: RwLock<Shared>,
}

/// Owner of the single broker session.
///
/// Cheap to clone; clones share the session, the failure cooldown, and
/// the watchdog.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<StateStore>,
        minter: Arc<dyn CredentialMinter>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                minter,
                connector,
                shared: RwLock::new(Shared {
                    session: None,
                    failure: None,
                    watchdog: CancellationToken::new(),
                }),
            }),
        }
    }

    /// Hand out the live session, reconnecting first if necessary.
    ///
    /// Concurrent callers during a reconnect serialize on the write
    /// lock; exactly one performs the connection attempt and the rest
    /// observe its outcome.
    pub async fn get_session(&self) -> Result<Arc<Session>, Error> {
        // Fast path: a healthy session already exists.
        {
            let shared = self.inner.shared.read().await;
            if let Some(session) = &shared.session {
                if session.healthy() {
                    return Ok(Arc::clone(session));
                }
            }
        }

        let mut shared = self.inner.shared.write().await;

        // Another caller may have reconnected while we waited.
        if let Some(session) = &shared.session {
            if session.healthy() {
                return Ok(Arc::clone(session));
            }
        }

        // Failure cooldown: replay the recorded error until it expires.
        if let Some(failure) = &shared.failure {
            if failure.at.elapsed() < MIN_REAUTH_INTERVAL {
                debug!("reconnect still cooling down, replaying last failure");
                return Err(failure.error.clone());
            }
            shared.failure = None;
        }

        // Retire the dead session before replacing it.
        if let Some(stale) = shared.session.take() {
            shared.watchdog.cancel();
            stale.close().await;
        }

        match self.open_session().await {
            Ok(session) => {
                let watchdog = CancellationToken::new();
                shared.session = Some(Arc::clone(&session));
                shared.failure = None;
                shared.watchdog = watchdog.clone();
                tokio::spawn(run_watchdog(
                    Arc::clone(&self.inner),
                    Arc::clone(&session),
                    watchdog,
                ));
                info!("broker session established");
                Ok(session)
            }
            Err(error) => {
                warn!(error = %error, "broker session attempt failed");
                shared.failure = Some(ReconnectFailure {
                    error: error.clone(),
                    at: Instant::now(),
                });
                Err(error)
            }
        }
    }

    /// Open a session within [`CONNECT_TIMEOUT`]. The write lock is held
    /// across this call, so an unbounded stall in the identity provider
    /// would otherwise wedge every `get_session` caller behind it.
    async fn open_session(&self) -> Result<Arc<Session>, Error> {
        match tokio::time::timeout(CONNECT_TIMEOUT, self.open_session_inner()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Broker(leapgate_broker::Error::transport(
                "broker reconnect timed out",
            ))),
        }
    }

    /// Prefer persisted credentials, falling back to minting fresh ones
    /// exactly once.
    async fn open_session_inner(&self) -> Result<Arc<Session>, Error> {
        if let Some(credentials) = self.inner.store.credentials() {
            match self.inner.connector.open(&credentials).await {
                Ok(link) => return Ok(Session::new(link)),
                Err(error) => {
                    warn!(error = %error, "stored credentials rejected, minting fresh ones");
                }
            }
        } else {
            info!("no stored credentials, minting fresh ones");
        }

        let credentials = self.inner.minter.mint().await?;
        self.inner.store.set_credentials(credentials.clone());
        self.inner.store.persist()?;

        // A failure with freshly minted credentials is terminal for this
        // attempt; retrying would loop against the same broker.
        let link = self.inner.connector.open(&credentials).await?;
        Ok(Session::new(link))
    }

    /// Tear down the live session and its watchdog, if any.
    pub async fn shutdown(&self) {
        let mut shared = self.inner.shared.write().await;
        shared.watchdog.cancel();
        if let Some(session) = shared.session.take() {
            session.close().await;
        }
    }
}

// ── Keepalive watchdog ───────────────────────────────────────────────

/// Probe the broker on a fixed cadence and retire the session on the
/// first failed probe. The next `get_session` call reconnects.
async fn run_watchdog(inner: Arc<Inner>, session: Arc<Session>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    // The first tick fires immediately; the session was just opened, so
    // skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                trace!("watchdog cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        // A link that already reports an error needs no teardown: the
        // manager replaces it lazily on the next access.
        if let Some(error) = session.last_error() {
            debug!(error = %error, "session link died, watchdog stopping");
            return;
        }

        match session
            .client()
            .read_with_timeout::<serde_json::Value>(PING_URL, PING_TIMEOUT)
            .await
        {
            Ok(_) => trace!("keepalive probe ok"),
            Err(error) => {
                if session.last_error().is_some() {
                    debug!("link error surfaced during probe, watchdog stopping");
                    return;
                }
                warn!(error = %error, "keepalive probe failed, retiring session");
                break;
            }
        }
    }

    let mut shared = inner.shared.write().await;
    // Only retire the session this watchdog was spawned for; a reconnect
    // may already have replaced it.
    if shared
        .session
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, &session))
    {
        shared.session = None;
    }
    drop(shared);
    session.close().await;
}
