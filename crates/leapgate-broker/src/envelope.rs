//! LEAP message envelopes.
//!
//! Every message exchanged with the broker is one [`Envelope`]: a
//! communique type (`ReadRequest`, `ReadResponse`, `CreateRequest`, ...),
//! an addressing header carrying the correlation tag and target URL, and
//! an optional JSON body. Field names on the wire are PascalCase except
//! for `href` references inside bodies.

use serde::{Deserialize, Serialize};

// ── Communique types ─────────────────────────────────────────────────

/// Request to read the resource at the header URL.
pub const READ_REQUEST: &str = "ReadRequest";

/// Request to create/execute against the resource at the header URL
/// (used for command processors).
pub const CREATE_REQUEST: &str = "CreateRequest";

// ── Header ───────────────────────────────────────────────────────────

/// Addressing header carried by every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    /// Per-request correlation tag, minted by
    /// [`CorrelatedClient`](crate::CorrelatedClient). Response envelopes
    /// echo the tag of the request they answer.
    pub client_tag: String,

    /// The logical resource addressed, e.g. `/device` or
    /// `/zone/5/commandprocessor`.
    pub url: String,
}

// ── Envelope ─────────────────────────────────────────────────────────

/// One message unit exchanged over the broker connection.
///
/// Immutable once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub communique_type: String,
    pub header: Header,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

// ── Request ──────────────────────────────────────────────────────────

/// An outgoing request with everything but its correlation tag.
///
/// The tag is minted at send time so each logical call gets a fresh one.
#[derive(Debug, Clone)]
pub struct Request {
    pub communique_type: String,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

impl Request {
    /// A `ReadRequest` addressed at `url`.
    pub fn read(url: impl Into<String>) -> Self {
        Self {
            communique_type: READ_REQUEST.into(),
            url: url.into(),
            body: None,
        }
    }

    /// A `CreateRequest` addressed at `url` carrying `body`.
    pub fn create(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            communique_type: CREATE_REQUEST.into(),
            url: url.into(),
            body: Some(body),
        }
    }

    /// Stamp the request with its correlation tag, producing the envelope
    /// that goes on the wire.
    pub fn into_envelope(self, client_tag: String) -> Envelope {
        Envelope {
            communique_type: self.communique_type,
            header: Header {
                client_tag,
                url: self.url,
            },
            body: self.body,
        }
    }
}
