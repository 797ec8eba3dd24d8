//! Per-client session state: identity, restoration, persistence and expiry.
//!
//! A [`SessionStore`] is built once at startup from the configured
//! [`SessionMode`]. For every request it [`open`](SessionStore::open)s a
//! [`Session`]: the session cookie is looked up, the snapshot is restored
//! from the backend when one exists, and a fresh ID is minted otherwise.
//! The session is written back exactly once, by [`Session::update`], when
//! the connection closes.
//!
//! Expired entries are removed by a separate periodic sweep
//! ([`SessionStore::spawn_garbage_collector`]), never on the request path.
//!
//! Concurrent requests carrying the same session ID are not serialized:
//! the last one to persist wins.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::http::{Cookie, Request, Response, ResponseError};

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Name of the cookie carrying the session ID.
pub const SESSION_COOKIE_NAME: &str = "rmvc_sessionid";

/// Schema-less session payload. Keys are kept sorted so snapshots encode stably.
pub type SessionData = Map<String, Value>;

/// Where session snapshots are kept between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Sessions disabled: no cookie, no persistence.
    #[default]
    Off,
    /// Process-wide map, lost on restart.
    Memory,
    /// One JSON file per session ID.
    File,
}

/// Errors raised by session backends.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session snapshot (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to issue the session cookie: {0}")]
    Cookie(#[from] ResponseError),
}

/// Storage for session snapshots keyed by session ID.
///
/// Implementations are shared by every connection task and must tolerate
/// concurrent calls. Calls may block; the file backend does, which is
/// accepted because each task serves exactly one connection.
pub trait SessionBackend: Send + Sync + fmt::Debug {
    /// Returns the stored snapshot for `id`, if any.
    fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError>;

    /// Replaces the snapshot for `id` and refreshes its last-touch time.
    fn store(&self, id: &str, data: &SessionData) -> Result<(), SessionError>;

    /// Deletes every entry last touched strictly before `cutoff`.
    ///
    /// Returns the number of entries removed.
    fn garbage_collect(&self, cutoff: SystemTime) -> Result<usize, SessionError>;
}

/// Lifecycle of the session attached to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sessions are off; nothing is issued or persisted.
    Uninitialized,
    /// A new ID was minted (no cookie, or the backend had no snapshot).
    New,
    /// The snapshot was found in the backend and merged in.
    Restored,
}

/// Session state for a single request.
///
/// # Examples
///
/// ```
/// use rmvc::session::Session;
///
/// let mut session = Session::disabled();
/// session.set("cart", 3);
/// assert_eq!(session.get("cart"), Some(&serde_json::json!(3)));
/// assert!(session.update().is_ok()); // no-op: sessions are off
/// ```
#[derive(Clone)]
pub struct Session {
    id: Option<String>,
    data: SessionData,
    state: SessionState,
    dirty: bool,
    backend: Option<Arc<dyn SessionBackend>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("dirty", &self.dirty)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Session {
    /// A session that is never issued nor persisted.
    pub fn disabled() -> Self {
        Self {
            id: None,
            data: SessionData::new(),
            state: SessionState::Uninitialized,
            dirty: false,
            backend: None,
        }
    }

    /// The session ID, or an empty string when sessions are off.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// `true` once any key was set or removed during this request.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserializes the value stored under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        self.dirty |= removed.is_some();
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    /// Writes the full snapshot back to the backend.
    ///
    /// A no-op when sessions are off or no ID was assigned.
    pub fn update(&self) -> Result<(), SessionError> {
        match (&self.backend, &self.id) {
            (Some(backend), Some(id)) => backend.store(id, &self.data),
            _ => Ok(()),
        }
    }
}

/// Owner of the active session backend.
#[derive(Debug)]
pub struct SessionStore {
    mode: SessionMode,
    backend: Option<Arc<dyn SessionBackend>>,
    timeout: Duration,
}

impl SessionStore {
    /// Sessions disabled.
    pub fn off() -> Self {
        Self {
            mode: SessionMode::Off,
            backend: None,
            timeout: Duration::ZERO,
        }
    }

    /// In-memory sessions expiring after `timeout` without a touch.
    pub fn memory(timeout: Duration) -> Self {
        Self::with_backend(SessionMode::Memory, Arc::new(MemoryBackend::new()), timeout)
    }

    /// File sessions stored under `dir`, which is created if missing.
    pub fn file(dir: impl Into<std::path::PathBuf>, timeout: Duration) -> Result<Self, SessionError> {
        let backend = FileBackend::create(dir)?;
        Ok(Self::with_backend(SessionMode::File, Arc::new(backend), timeout))
    }

    /// Uses a custom backend.
    pub fn with_backend(
        mode: SessionMode,
        backend: Arc<dyn SessionBackend>,
        timeout: Duration,
    ) -> Self {
        Self {
            mode,
            backend: Some(backend),
            timeout,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attaches a session to `request` and issues the session cookie on `response`.
    ///
    /// A cookie value that is not a lowercase base-36 token is ignored, so that
    /// backend keys derived from it stay well formed.
    ///
    /// # Errors
    ///
    /// Backend read failures and a response whose headers were already sent.
    pub fn open(&self, request: &mut Request, response: &mut Response) -> Result<(), SessionError> {
        let Some(backend) = &self.backend else {
            request.set_session(Session::disabled());
            return Ok(());
        };

        let existing = request
            .cookie(SESSION_COOKIE_NAME)
            .filter(|id| is_valid_session_id(id))
            .map(str::to_owned);

        let (id, data, state) = match existing {
            Some(id) => match backend.load(&id)? {
                Some(data) => (id, data, SessionState::Restored),
                None => (id, SessionData::new(), SessionState::New),
            },
            None => (
                generate_session_id(request.remote_addr()),
                SessionData::new(),
                SessionState::New,
            ),
        };

        debug!(session = %id, ?state, "session opened");
        response.set_cookie(Cookie::new(SESSION_COOKIE_NAME, id.clone()))?;
        request.set_session(Session {
            id: Some(id),
            data,
            state,
            dirty: false,
            backend: Some(Arc::clone(backend)),
        });
        Ok(())
    }

    /// Removes entries idle for longer than the timeout. Returns how many went.
    pub fn garbage_collect(&self) -> Result<usize, SessionError> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        let cutoff = SystemTime::now()
            .checked_sub(self.timeout)
            .unwrap_or(UNIX_EPOCH);
        backend.garbage_collect(cutoff)
    }

    /// Runs [`garbage_collect`](Self::garbage_collect) every `period` on the
    /// blocking pool until the returned handle is aborted.
    pub fn spawn_garbage_collector(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let store = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || store.garbage_collect()).await {
                    Ok(Ok(removed)) => debug!(removed, "session garbage collection done"),
                    Ok(Err(e)) => warn!(error = %e, "session garbage collection failed"),
                    Err(e) => warn!(error = %e, "session garbage collector panicked"),
                }
            }
        })
    }
}

/// Mints a session ID from the client address digits, a random component and
/// the current time, each base-36 encoded.
///
/// Uniqueness is best effort and the result is guessable: it is an opaque
/// handle, not a secret.
pub fn generate_session_id(remote_addr: Option<SocketAddr>) -> String {
    let digits: String = remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    // u128 holds 38 decimal digits; keep the low-order ones of longer addresses.
    let tail = &digits[digits.len().saturating_sub(38)..];
    let address = tail.parse::<u128>().unwrap_or(0);

    let random = u128::from(rand::random::<u64>());
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let mut id = to_base36(address);
    id.push_str(&to_base36(random));
    id.push_str(&to_base36(millis));
    id
}

/// Whether `id` looks like something [`generate_session_id`] produced.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}
