//! Error types for the core gateway layer.

use thiserror::Error;

/// Errors produced by the state store, the session lifecycle, and the
/// device operations.
///
/// `Clone` because a reconnect failure is cached and handed back
/// verbatim to every caller during the cooldown window.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Broker ───────────────────────────────────────────────────────
    /// A broker call or the connection attempt itself failed.
    #[error(transparent)]
    Broker(#[from] leapgate_broker::Error),

    // ── State file ───────────────────────────────────────────────────
    /// Reading or writing the persisted state file failed.
    #[error("state persistence failed: {message}")]
    Persistence { message: String },

    /// A cached or persisted value no longer decodes into its expected
    /// shape.
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    /// A value could not be serialized for persistence.
    #[error("failed to encode {what}: {message}")]
    Encode { what: String, message: String },

    // ── Commands ─────────────────────────────────────────────────────
    /// The caller supplied a malformed or out-of-range command.
    #[error("invalid command: {message}")]
    InvalidCommand { message: String },
}

impl Error {
    pub fn persistence(message: impl std::fmt::Display) -> Self {
        Self::Persistence {
            message: message.to_string(),
        }
    }

    pub fn decode(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn encode(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Encode {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    /// Whether this error reflects bad caller input rather than a
    /// gateway-side failure. Drives the HTTP status mapping.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::InvalidCommand { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_command_is_bad_request() {
        assert!(Error::invalid_command("level out of range").is_bad_request());
        assert!(!Error::persistence("disk full").is_bad_request());
        assert!(!Error::from(leapgate_broker::Error::LinkClosed).is_bad_request());
    }

    #[test]
    fn broker_error_displays_transparently() {
        let error = Error::from(leapgate_broker::Error::Timeout {
            url: "/device".into(),
        });
        assert_eq!(
            error.to_string(),
            leapgate_broker::Error::Timeout {
                url: "/device".into()
            }
            .to_string()
        );
    }
}
