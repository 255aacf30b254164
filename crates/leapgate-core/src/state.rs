//! The persisted state file.
//!
//! One JSON document holds everything the gateway needs to survive a
//! restart: the minted broker credentials and a keyed cache of expensive
//! read results. Mutations only mark the in-memory copy dirty; callers
//! decide when to flush with [`StateStore::persist_if_dirty`], typically
//! once per handled request.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use leapgate_broker::BrokerCredentials;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Error;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<BrokerCredentials>,

    #[serde(default)]
    cache: HashMap<String, serde_json::Value>,
}

#[derive(Debug)]
struct StateInner {
    state: PersistedState,
    dirty: bool,
}

/// Durable gateway state backed by a single JSON file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<StateInner>,
}

impl StateStore {
    /// Load the state file at `path`, or start empty if it does not
    /// exist yet. A file that exists but fails to parse is an error;
    /// silently discarding minted credentials would force a needless
    /// reauthentication.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| Error::decode(format!("state file {}", path.display()), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no state file yet, starting empty");
                PersistedState::default()
            }
            Err(e) => return Err(Error::persistence(e)),
        };

        Ok(Self {
            path,
            inner: Mutex::new(StateInner {
                state,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Credentials ──────────────────────────────────────────────────

    pub fn credentials(&self) -> Option<BrokerCredentials> {
        self.lock().state.credentials.clone()
    }

    pub fn set_credentials(&self, credentials: BrokerCredentials) {
        let mut inner = self.lock();
        inner.state.credentials = Some(credentials);
        inner.dirty = true;
    }

    // ── Response cache ───────────────────────────────────────────────

    pub fn cache_get(&self, key: &str) -> Option<serde_json::Value> {
        self.lock().state.cache.get(key).cloned()
    }

    /// Store `value` under `key`. Always marks the store dirty, even
    /// when the value is unchanged.
    pub fn cache_set(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut inner = self.lock();
        inner.state.cache.insert(key.into(), value);
        inner.dirty = true;
    }

    /// Drop every cached entry. Clearing an already-empty cache leaves
    /// the dirty flag untouched.
    pub fn clear_cache(&self) {
        let mut inner = self.lock();
        if inner.state.cache.is_empty() {
            return;
        }
        inner.state.cache.clear();
        inner.dirty = true;
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Write the state file unconditionally and clear the dirty flag.
    pub fn persist(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        let text = serde_json::to_string_pretty(&inner.state)
            .map_err(|e| Error::encode("state file", e))?;

        // Write-then-rename so a crash mid-write never truncates the
        // previous good state.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(Error::persistence)?;
        fs::rename(&tmp, &self.path).map_err(Error::persistence)?;

        inner.dirty = false;
        debug!(path = %self.path.display(), "state persisted");
        Ok(())
    }

    /// Write the state file only if something changed since the last
    /// flush.
    pub fn persist_if_dirty(&self) -> Result<(), Error> {
        if self.is_dirty() {
            self.persist()?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.inner.lock().expect("state lock poisoned")
    }
}
