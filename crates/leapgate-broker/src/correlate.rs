//! Correlated request/response multiplexing over a shared [`BrokerLink`].
//!
//! Every logical call mints a fresh correlation tag, registers a pending
//! slot in a tag-keyed registry, sends its envelope, and suspends until
//! the dispatcher resolves the slot with the first matching inbound
//! envelope — or the deadline fires, or the link dies. Responses may
//! arrive in any order; matching is by tag alone.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::try_join_all;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, Request};
use crate::error::Error;
use crate::link::BrokerLink;

/// Default deadline applied to a single call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

// ── Matcher ──────────────────────────────────────────────────────────

/// How a pending call decides whether an inbound envelope answers it.
///
/// Deliberately narrow — tag equality, optionally refined by communique
/// type — so resolution logic stays inspectable instead of hiding in
/// arbitrary capturing predicates.
#[derive(Debug, Clone)]
pub struct Matcher {
    tag: String,
    communique_type: Option<String>,
}

impl Matcher {
    /// Match any envelope echoing `tag`. This is the default for every
    /// call.
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            communique_type: None,
        }
    }

    /// Additionally require a specific communique type.
    pub fn with_communique_type(mut self, communique_type: impl Into<String>) -> Self {
        self.communique_type = Some(communique_type.into());
        self
    }

    fn matches(&self, envelope: &Envelope) -> bool {
        envelope.header.client_tag == self.tag
            && self
                .communique_type
                .as_deref()
                .is_none_or(|ct| ct == envelope.communique_type)
    }
}

// ── Pending-call registry ────────────────────────────────────────────

/// In-flight state for one issued call: its matcher and the slot the
/// dispatcher delivers the response into.
struct PendingCall {
    matcher: Matcher,
    slot: oneshot::Sender<Arc<Envelope>>,
}

#[derive(Default)]
struct PendingRegistry {
    calls: DashMap<String, PendingCall>,
}

impl PendingRegistry {
    /// Register a call, returning a guard that unregisters it again when
    /// dropped. Cancellation safety hinges on this: a caller abandoned
    /// mid-await (outer timeout, failed batch sibling, disconnected HTTP
    /// client) still removes its entry on the way out.
    fn register(registry: &Arc<Self>, tag: String, matcher: Matcher) -> PendingCallGuard {
        let (slot, receiver) = oneshot::channel();
        registry.calls.insert(tag.clone(), PendingCall { matcher, slot });
        PendingCallGuard {
            registry: Arc::clone(registry),
            tag,
            receiver,
        }
    }

    /// Deliver `envelope` to the pending call it answers, if any.
    ///
    /// The entry is removed before the slot is used, so exactly one
    /// response is ever delivered per call; a second envelope with the
    /// same tag finds no entry and is dropped.
    fn resolve(&self, envelope: &Arc<Envelope>) {
        let tag = envelope.header.client_tag.as_str();
        if let Some((_, call)) = self
            .calls
            .remove_if(tag, |_, call| call.matcher.matches(envelope))
        {
            // A dropped receiver (caller timed out or was cancelled)
            // makes this a no-op.
            let _ = call.slot.send(Arc::clone(envelope));
        }
    }

    /// Drop every pending slot, waking all outstanding callers with a
    /// terminal error.
    fn fail_all(&self) {
        self.calls.clear();
    }

    fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Owns one registered call: the receiver its response arrives on and
/// the obligation to unregister the tag. Dropping the guard forgets the
/// call; any late-arriving response finds no entry and is discarded.
struct PendingCallGuard {
    registry: Arc<PendingRegistry>,
    tag: String,
    receiver: oneshot::Receiver<Arc<Envelope>>,
}

impl Drop for PendingCallGuard {
    fn drop(&mut self) {
        self.registry.calls.remove(&self.tag);
    }
}

// ── CorrelatedClient ─────────────────────────────────────────────────

/// Issues logical requests over a shared [`BrokerLink`] and matches the
/// responses back by correlation tag.
///
/// Cheaply cloneable; all clones share one registry and one dispatcher
/// task. The dispatcher exits — failing all outstanding calls — when the
/// link's inbound stream closes.
#[derive(Clone)]
pub struct CorrelatedClient {
    link: Arc<dyn BrokerLink>,
    pending: Arc<PendingRegistry>,
    call_timeout: Duration,
}

impl CorrelatedClient {
    /// Wrap `link` with the default per-call timeout.
    pub fn new(link: Arc<dyn BrokerLink>) -> Self {
        Self::with_timeout(link, DEFAULT_CALL_TIMEOUT)
    }

    /// Wrap `link` with a custom per-call timeout.
    pub fn with_timeout(link: Arc<dyn BrokerLink>, call_timeout: Duration) -> Self {
        let pending = Arc::new(PendingRegistry::default());
        let inbound = link.subscribe();
        tokio::spawn(dispatch_loop(inbound, Arc::clone(&pending)));

        Self {
            link,
            pending,
            call_timeout,
        }
    }

    /// The underlying link.
    pub fn link(&self) -> &Arc<dyn BrokerLink> {
        &self.link
    }

    /// Number of in-flight calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Issue one request and wait for its correlated response.
    pub async fn call(&self, request: Request) -> Result<Arc<Envelope>, Error> {
        self.call_until(request, Instant::now() + self.call_timeout)
            .await
    }

    /// [`call`](Self::call) with an explicit deadline, so batched calls
    /// can share one.
    pub async fn call_until(
        &self,
        request: Request,
        deadline: Instant,
    ) -> Result<Arc<Envelope>, Error> {
        let tag = Uuid::new_v4().to_string();
        let url = request.url.clone();
        trace!(%tag, %url, communique_type = %request.communique_type, "issuing call");

        // Register before sending so a response racing the send cannot
        // slip past the dispatcher. The guard unregisters the tag on
        // every exit path, including this future being dropped.
        let mut guard =
            PendingRegistry::register(&self.pending, tag.clone(), Matcher::tag(tag.clone()));

        self.link.send(request.into_envelope(tag)).await?;

        match tokio::time::timeout_at(deadline, &mut guard.receiver).await {
            Ok(Ok(response)) => Ok(response),
            // The registry dropped our slot: the link died underneath us.
            Ok(Err(_)) => Err(self.link.last_error().unwrap_or(Error::LinkClosed)),
            Err(_) => Err(Error::Timeout { url }),
        }
    }

    /// Issue a `ReadRequest` for `url` and decode the response body.
    ///
    /// Decode failures are reported as [`Error::Decode`], distinct from
    /// transport failures.
    pub async fn read<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        self.read_until(url, Instant::now() + self.call_timeout)
            .await
    }

    /// [`read`](Self::read) with a caller-supplied timeout, used for the
    /// keepalive probe.
    pub async fn read_with_timeout<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, Error> {
        self.read_until(url, Instant::now() + timeout).await
    }

    async fn read_until<T: DeserializeOwned>(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<T, Error> {
        let response = self.call_until(Request::read(url), deadline).await?;
        decode_body(url, &response)
    }

    /// Issue a `CreateRequest` and wait for its acknowledgement; the
    /// response body is discarded.
    pub async fn create(&self, url: &str, body: serde_json::Value) -> Result<(), Error> {
        self.call(Request::create(url, body)).await.map(|_| ())
    }

    /// Fan a set of reads out concurrently, collecting results by URL.
    ///
    /// An empty set returns an empty map without touching the link. All
    /// reads share one deadline. Any single failure fails the whole batch
    /// with the first captured error; the remaining in-flight reads are
    /// abandoned. On success the result has exactly one entry per input
    /// URL.
    pub async fn read_many<T: DeserializeOwned>(
        &self,
        urls: &BTreeSet<String>,
    ) -> Result<HashMap<String, T>, Error> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }

        let deadline = Instant::now() + self.call_timeout;
        let fetches = urls.iter().map(|url| async move {
            let value = self.read_until::<T>(url, deadline).await?;
            Ok::<_, Error>((url.clone(), value))
        });

        Ok(try_join_all(fetches).await?.into_iter().collect())
    }
}

fn decode_body<T: DeserializeOwned>(url: &str, envelope: &Envelope) -> Result<T, Error> {
    let body = envelope.body.clone().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(body).map_err(|error| Error::Decode {
        url: url.into(),
        message: error.to_string(),
    })
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Reads the link's inbound stream and resolves pending calls until the
/// stream closes, then fails everything still outstanding.
async fn dispatch_loop(
    mut inbound: broadcast::Receiver<Arc<Envelope>>,
    pending: Arc<PendingRegistry>,
) {
    loop {
        match inbound.recv().await {
            Ok(envelope) => pending.resolve(&envelope),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "envelope dispatcher lagged; responses may be lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    pending.fail_all();
    trace!("envelope dispatcher exited");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::READ_REQUEST;
    use crate::testing::{FakeLink, response_to};
    use serde::Deserialize;
    use serde_json::json;

    /// Poll until `n` envelopes have been sent on the link.
    async fn wait_for_sent(link: &Arc<FakeLink>, n: usize) -> Vec<Envelope> {
        for _ in 0..500 {
            let sent = link.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("link never saw {n} envelopes; got {:?}", link.sent());
    }

    #[tokio::test]
    async fn call_receives_matching_response() {
        let link = FakeLink::new();
        link.respond_with(|request| {
            Some(response_to(request, "ReadResponse", json!({"Value": 7})))
        });
        let client = CorrelatedClient::new(link.clone());

        let response = client.call(Request::read("/thing")).await.unwrap();
        assert_eq!(response.communique_type, "ReadResponse");
        assert_eq!(response.body, Some(json!({"Value": 7})));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_each_get_their_own_response_out_of_order() {
        let link = FakeLink::new();
        let client = CorrelatedClient::new(link.clone());

        let a = client.read::<serde_json::Value>("/a");
        let b = client.read::<serde_json::Value>("/b");

        let pusher = {
            let link = Arc::clone(&link);
            async move {
                let sent = wait_for_sent(&link, 2).await;
                // Respond in reverse order of issue.
                for request in sent.iter().rev() {
                    let body = json!({ "Echo": request.header.url });
                    link.push(response_to(request, "ReadResponse", body));
                }
            }
        };

        let (a, b, ()) = tokio::join!(a, b, pusher);
        assert_eq!(a.unwrap(), json!({"Echo": "/a"}));
        assert_eq!(b.unwrap(), json!({"Echo": "/b"}));
    }

    #[tokio::test]
    async fn timeout_abandons_the_pending_call() {
        let link = FakeLink::new();
        let client = CorrelatedClient::with_timeout(link.clone(), Duration::from_millis(20));

        let result = client.read::<serde_json::Value>("/slow").await;
        assert!(matches!(result, Err(Error::Timeout { ref url }) if url == "/slow"));
        assert_eq!(client.pending_calls(), 0);

        // A late response for the abandoned tag is dropped silently.
        let sent = link.sent();
        link.push(response_to(&sent[0], "ReadResponse", json!({})));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_response_is_a_no_op() {
        let link = FakeLink::new();
        let client = CorrelatedClient::new(link.clone());

        let call = client.read::<serde_json::Value>("/x");
        let pusher = {
            let link = Arc::clone(&link);
            async move {
                let sent = wait_for_sent(&link, 1).await;
                let response = response_to(&sent[0], "ReadResponse", json!({"N": 1}));
                link.push(response.clone());
                link.push(response);
            }
        };

        let (result, ()) = tokio::join!(call, pusher);
        assert_eq!(result.unwrap(), json!({"N": 1}));
    }

    #[tokio::test]
    async fn link_death_fails_outstanding_calls() {
        let link = FakeLink::new();
        let client = CorrelatedClient::new(link.clone());

        let call = client.read::<serde_json::Value>("/doomed");
        let killer = {
            let link = Arc::clone(&link);
            async move {
                wait_for_sent(&link, 1).await;
                link.fail(Error::transport("connection reset by peer"));
            }
        };

        let (result, ()) = tokio::join!(call, killer);
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn send_failure_unregisters_the_call() {
        let link = FakeLink::new();
        link.fail(Error::transport("already dead"));
        let client = CorrelatedClient::new(link.clone());

        let result = client.read::<serde_json::Value>("/x").await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn decode_failure_is_distinct_from_transport() {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "PascalCase")]
        #[allow(dead_code)]
        struct Expected {
            devices: Vec<String>,
        }

        let link = FakeLink::new();
        link.respond_with(|request| {
            Some(response_to(request, "ReadResponse", json!({"Devices": 42})))
        });
        let client = CorrelatedClient::new(link);

        let result = client.read::<Expected>("/device").await;
        assert!(matches!(result, Err(Error::Decode { ref url, .. }) if url == "/device"));
    }

    #[tokio::test]
    async fn create_discards_the_response_body() {
        let link = FakeLink::new();
        link.respond_with(|request| {
            Some(response_to(request, "CreateResponse", json!({"Ignored": true})))
        });
        let client = CorrelatedClient::new(link.clone());

        client
            .create("/zone/3/commandprocessor", json!({"Command": {}}))
            .await
            .unwrap();
        assert_eq!(link.sent()[0].communique_type, "CreateRequest");
    }

    #[tokio::test]
    async fn read_many_of_empty_set_issues_no_calls() {
        let link = FakeLink::new();
        let client = CorrelatedClient::new(link.clone());

        let results: HashMap<String, serde_json::Value> =
            client.read_many(&BTreeSet::new()).await.unwrap();
        assert!(results.is_empty());
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn read_many_key_set_equals_input_set() {
        let link = FakeLink::new();
        link.respond_with(|request| {
            let body = json!({ "Url": request.header.url });
            Some(response_to(request, "ReadResponse", body))
        });
        let client = CorrelatedClient::new(link);

        let urls: BTreeSet<String> = ["/preset/1", "/preset/2", "/preset/3"]
            .into_iter()
            .map(String::from)
            .collect();
        let results: HashMap<String, serde_json::Value> = client.read_many(&urls).await.unwrap();

        let keys: BTreeSet<String> = results.keys().cloned().collect();
        assert_eq!(keys, urls);
        assert_eq!(results["/preset/2"], json!({"Url": "/preset/2"}));
    }

    #[tokio::test]
    async fn read_many_fails_when_any_member_fails() {
        let link = FakeLink::new();
        // Answer everything except /preset/2, which times out.
        link.respond_with(|request| {
            if request.header.url == "/preset/2" {
                return None;
            }
            Some(response_to(request, "ReadResponse", json!({})))
        });
        let client = CorrelatedClient::with_timeout(link, Duration::from_millis(30));

        let urls: BTreeSet<String> = ["/preset/1", "/preset/2", "/preset/3"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = client.read_many::<serde_json::Value>(&urls).await;
        assert!(matches!(result, Err(Error::Timeout { ref url }) if url == "/preset/2"));
        // The surviving sibling reads were dropped mid-flight; their
        // registrations must not linger.
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_call_unregisters_its_pending_entry() {
        let link = FakeLink::new();
        let client = CorrelatedClient::new(link.clone());

        // An outer timeout shorter than the call's own deadline drops the
        // call future before it resolves.
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            client.read::<serde_json::Value>("/never-answered"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(client.pending_calls(), 0);

        // A response arriving after the cancellation is dropped silently.
        let sent = wait_for_sent(&link, 1).await;
        link.push(response_to(&sent[0], "ReadResponse", json!({})));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn matcher_refined_by_communique_type() {
        let matcher = Matcher::tag("t").with_communique_type("ReadResponse");

        let response = Request::read("/x").into_envelope("t".into());
        let mut read_response = response.clone();
        read_response.communique_type = "ReadResponse".into();

        assert!(matcher.matches(&read_response));
        assert!(!matcher.matches(&response)); // wrong communique type
        assert!(
            !Matcher::tag("other").matches(&read_response),
            "tag mismatch must never match"
        );
    }

    #[tokio::test]
    async fn envelope_with_unknown_tag_is_ignored() {
        let link = FakeLink::new();
        let client = CorrelatedClient::new(link.clone());

        link.push(Envelope {
            communique_type: "ReadResponse".into(),
            header: crate::envelope::Header {
                client_tag: "nobody-waiting".into(),
                url: "/x".into(),
            },
            body: None,
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(client.pending_calls(), 0);
    }

    #[test]
    fn read_request_constant_matches_wire_name() {
        assert_eq!(READ_REQUEST, "ReadRequest");
    }
}
