//! Session lifecycle tests: reconnect, cooldown, thundering herd, and
//! the keepalive watchdog, all against in-memory fakes with paused time.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use leapgate_broker::testing::{FakeLink, response_to};
use leapgate_broker::{BrokerCredentials, BrokerLink, CredentialMinter};
use leapgate_core::session::{MIN_REAUTH_INTERVAL, PING_INTERVAL, PING_TIMEOUT};
use leapgate_core::{BrokerConnector, Error, SessionManager, StateStore};

fn credentials(token: &str) -> BrokerCredentials {
    BrokerCredentials {
        broker_url: Url::parse("wss://broker.example.net/leap").unwrap(),
        device_serial: "01F2A3B4".into(),
        access_token: token.into(),
    }
}

/// A link that answers every request, keeping the watchdog happy.
fn responsive_link() -> Arc<FakeLink> {
    let link = FakeLink::new();
    link.respond_with(|request| Some(response_to(request, "ReadResponse", json!({}))));
    link
}

/// A link that accepts sends but never answers, so probes time out.
fn silent_link() -> Arc<FakeLink> {
    FakeLink::new()
}

// ── Fakes ────────────────────────────────────────────────────────────

struct FakeMinter {
    calls: AtomicUsize,
    outcome: Mutex<Result<BrokerCredentials, String>>,
}

impl FakeMinter {
    fn minting(credentials: BrokerCredentials) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Mutex::new(Ok(credentials)),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Mutex::new(Err(message.into())),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialMinter for FakeMinter {
    async fn mint(&self) -> Result<BrokerCredentials, leapgate_broker::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .lock()
            .unwrap()
            .clone()
            .map_err(leapgate_broker::Error::authentication)
    }
}

/// A minter that never resolves, standing in for a hung identity
/// provider.
struct StallingMinter;

#[async_trait]
impl CredentialMinter for StallingMinter {
    async fn mint(&self) -> Result<BrokerCredentials, leapgate_broker::Error> {
        std::future::pending().await
    }
}

type OpenOutcome = Result<Arc<FakeLink>, leapgate_broker::Error>;

struct FakeConnector {
    outcomes: Mutex<VecDeque<OpenOutcome>>,
    opened_with: Mutex<Vec<BrokerCredentials>>,
    delay: Option<Duration>,
}

impl FakeConnector {
    fn with_outcomes(outcomes: impl IntoIterator<Item = OpenOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            opened_with: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    fn always_healthy_with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            opened_with: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    fn opens(&self) -> usize {
        self.opened_with.lock().unwrap().len()
    }

    fn opened_with(&self) -> Vec<BrokerCredentials> {
        self.opened_with.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerConnector for FakeConnector {
    async fn open(
        &self,
        credentials: &BrokerCredentials,
    ) -> Result<Arc<dyn BrokerLink>, leapgate_broker::Error> {
        self.opened_with.lock().unwrap().push(credentials.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(responsive_link()));
        outcome.map(|link| link as Arc<dyn BrokerLink>)
    }
}

fn manager(
    minter: &Arc<FakeMinter>,
    connector: &Arc<FakeConnector>,
) -> (SessionManager, Arc<StateStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::load(dir.path().join("state.json")).unwrap());
    let manager = SessionManager::new(
        Arc::clone(&store),
        Arc::clone(minter) as Arc<dyn CredentialMinter>,
        Arc::clone(connector) as Arc<dyn BrokerConnector>,
    );
    (manager, store, dir)
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn first_connection_mints_and_persists_credentials() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let connector = FakeConnector::with_outcomes([]);
    let (manager, store, _dir) = manager(&minter, &connector);

    let session = manager.get_session().await.unwrap();

    assert!(session.healthy());
    assert_eq!(minter.calls(), 1);
    assert_eq!(store.credentials(), Some(credentials("fresh")));
    // Persisted, not just staged.
    assert!(!store.is_dirty());
    assert_eq!(connector.opened_with(), vec![credentials("fresh")]);
}

#[tokio::test(start_paused = true)]
async fn stored_credentials_skip_the_minter() {
    let minter = FakeMinter::failing("should not be called");
    let connector = FakeConnector::with_outcomes([]);
    let (manager, store, _dir) = manager(&minter, &connector);
    store.set_credentials(credentials("stored"));

    manager.get_session().await.unwrap();

    assert_eq!(minter.calls(), 0);
    assert_eq!(connector.opened_with(), vec![credentials("stored")]);
}

#[tokio::test(start_paused = true)]
async fn rejected_stored_credentials_trigger_one_remint() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let connector = FakeConnector::with_outcomes([Err(leapgate_broker::Error::authentication(
        "token expired",
    ))]);
    let (manager, store, _dir) = manager(&minter, &connector);
    store.set_credentials(credentials("stale"));

    let session = manager.get_session().await.unwrap();

    assert!(session.healthy());
    assert_eq!(minter.calls(), 1);
    assert_eq!(
        connector.opened_with(),
        vec![credentials("stale"), credentials("fresh")]
    );
    assert_eq!(store.credentials(), Some(credentials("fresh")));
}

#[tokio::test(start_paused = true)]
async fn failure_with_fresh_credentials_is_terminal() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let connector = FakeConnector::with_outcomes([
        Err(leapgate_broker::Error::authentication("token expired")),
        Err(leapgate_broker::Error::transport("broker unreachable")),
    ]);
    let (manager, store, _dir) = manager(&minter, &connector);
    store.set_credentials(credentials("stale"));

    let error = manager.get_session().await.unwrap_err();

    assert!(matches!(error, Error::Broker(_)), "{error:?}");
    // Exactly two opens: stale then fresh, no retry loop.
    assert_eq!(connector.opens(), 2);
    assert_eq!(minter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_collapse_into_one_connect() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let connector = FakeConnector::always_healthy_with_delay(Duration::from_millis(50));
    let (manager, _store, _dir) = manager(&minter, &connector);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move { manager.get_session().await }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(connector.opens(), 1);
    assert_eq!(minter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cooldown_replays_the_failure_without_io() {
    let minter = FakeMinter::failing("cloud says no");
    let connector = FakeConnector::with_outcomes([]);
    let (manager, _store, _dir) = manager(&minter, &connector);

    let first = manager.get_session().await.unwrap_err();
    assert_eq!(minter.calls(), 1);

    // Within the cooldown window the recorded failure comes back
    // verbatim, with no new minting or connecting.
    let replayed = manager.get_session().await.unwrap_err();
    assert_eq!(replayed.to_string(), first.to_string());
    assert_eq!(minter.calls(), 1);
    assert_eq!(connector.opens(), 0);

    // Once the window elapses a fresh attempt is made.
    tokio::time::advance(MIN_REAUTH_INTERVAL + Duration::from_secs(1)).await;
    let _ = manager.get_session().await.unwrap_err();
    assert_eq!(minter.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_credential_minting_fails_within_the_connect_deadline() {
    let connector = FakeConnector::with_outcomes([]);
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::load(dir.path().join("state.json")).unwrap());
    let manager = SessionManager::new(
        Arc::clone(&store),
        Arc::new(StallingMinter) as Arc<dyn CredentialMinter>,
        Arc::clone(&connector) as Arc<dyn BrokerConnector>,
    );

    // The reconnect deadline cuts the stalled mint off; without it this
    // call would hold the session lock forever.
    let error = manager.get_session().await.unwrap_err();
    assert!(matches!(error, Error::Broker(_)), "{error:?}");
    assert_eq!(connector.opens(), 0);

    // The deadline failure enters the cooldown like any other, so
    // follow-up callers get the replay instead of a fresh stall.
    let replayed = manager.get_session().await.unwrap_err();
    assert_eq!(replayed.to_string(), error.to_string());
}

#[tokio::test(start_paused = true)]
async fn watchdog_retires_session_when_probes_time_out() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let silent = silent_link();
    let connector = FakeConnector::with_outcomes([Ok(Arc::clone(&silent))]);
    let (manager, _store, _dir) = manager(&minter, &connector);

    let session = manager.get_session().await.unwrap();
    assert!(session.healthy());

    // Let the first probe fire and time out. Auto-advancing paused time
    // carries the watchdog through its interval and the probe deadline.
    tokio::time::sleep(PING_INTERVAL + PING_TIMEOUT + Duration::from_secs(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // The watchdog closed the silent link and cleared the shared
    // session, so the next caller reconnects exactly once.
    assert!(silent.last_error().is_some());
    let replacement = manager.get_session().await.unwrap();
    assert!(replacement.healthy());
    assert_eq!(connector.opens(), 2);
    assert_eq!(minter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn healthy_sessions_survive_many_probe_intervals() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let connector = FakeConnector::with_outcomes([]);
    let (manager, _store, _dir) = manager(&minter, &connector);

    let session = manager.get_session().await.unwrap();
    tokio::time::sleep(PING_INTERVAL * 3 + Duration::from_secs(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let again = manager.get_session().await.unwrap();
    assert!(Arc::ptr_eq(&session, &again));
    assert_eq!(connector.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn watchdog_stops_probing_once_the_link_reports_an_error() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let link = responsive_link();
    let connector = FakeConnector::with_outcomes([Ok(Arc::clone(&link))]);
    let (manager, _store, _dir) = manager(&minter, &connector);

    manager.get_session().await.unwrap();
    let sent_before = link.sent().len();
    link.fail(leapgate_broker::Error::transport("connection reset"));

    tokio::time::sleep(PING_INTERVAL * 3 + Duration::from_secs(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // The watchdog stopped without probing the dead link or closing it;
    // the recorded transport error is preserved as-is.
    assert_eq!(link.sent().len(), sent_before);
    assert!(matches!(
        link.last_error(),
        Some(leapgate_broker::Error::Transport(_))
    ));

    // Replacement still happens lazily on the next access.
    let second = manager.get_session().await.unwrap();
    assert!(second.healthy());
    assert_eq!(connector.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn errored_link_is_replaced_on_next_access() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let first_link = responsive_link();
    let connector = FakeConnector::with_outcomes([Ok(Arc::clone(&first_link))]);
    let (manager, _store, _dir) = manager(&minter, &connector);

    let first = manager.get_session().await.unwrap();
    first_link.fail(leapgate_broker::Error::transport("connection reset"));
    assert!(!first.healthy());

    let second = manager.get_session().await.unwrap();
    assert!(second.healthy());
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(connector.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_live_session() {
    let minter = FakeMinter::minting(credentials("fresh"));
    let link = responsive_link();
    let connector = FakeConnector::with_outcomes([Ok(Arc::clone(&link))]);
    let (manager, _store, _dir) = manager(&minter, &connector);

    manager.get_session().await.unwrap();
    manager.shutdown().await;

    assert!(link.last_error().is_some());
}
