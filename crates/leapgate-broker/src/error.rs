use thiserror::Error;

/// Top-level error type for the `leapgate-broker` crate.
///
/// Every variant carries owned strings rather than source errors so the
/// enum is `Clone`: the session layer caches the most recent reconnect
/// failure and replays it verbatim to callers for the duration of the
/// cooldown window.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Connection-level failure reported by the broker link.
    #[error("broker transport error: {0}")]
    Transport(String),

    /// The link's inbound stream ended while a call was outstanding.
    #[error("broker connection closed")]
    LinkClosed,

    // ── Correlation ─────────────────────────────────────────────────
    /// Deadline expired with no matching response envelope.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    // ── Data ────────────────────────────────────────────────────────
    /// Response body did not match the expected shape.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    // ── Authentication ──────────────────────────────────────────────
    /// Credential minting or broker handshake failed, including
    /// discovery-cardinality mismatches (more or fewer than exactly one
    /// eligible device or broker).
    #[error("authentication failed: {message}")]
    Authentication { message: String },
}

impl Error {
    /// Shorthand for a [`Transport`](Self::Transport) error from any
    /// displayable source.
    pub fn transport(source: impl std::fmt::Display) -> Self {
        Self::Transport(source.to_string())
    }

    /// Shorthand for an [`Authentication`](Self::Authentication) error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Returns `true` if this error means the underlying connection is
    /// unusable and must be replaced.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::LinkClosed)
    }
}
