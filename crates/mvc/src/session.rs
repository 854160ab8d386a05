//! HTTP sessions.
//!
//! A [`Session`] is identified by a cookie and persisted through a [`SessionStore`]. Each request
//! carries a lazy session slot: nothing is loaded until a handler asks for the session, and only
//! sessions that were touched are written back once the response is produced.

use crate::date::fmt_http_date;
use crate::error::{DispatchError, SessionError};
use crate::extract::FromRequest;
use crate::request::Request;
use async_trait::async_trait;
use dashmap::DashMap;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

pub const DEFAULT_COOKIE_NAME: &str = "SESSIONID";
const DEFAULT_MAX_INACTIVE_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    cookie_name: String,
    /// Idle time after which a session expires, `0` never expires.
    max_inactive_secs: u64,
    cookie_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            max_inactive_secs: DEFAULT_MAX_INACTIVE_SECS,
            cookie_path: "/".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }

    pub fn max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_secs = interval.as_secs();
        self
    }

    pub fn cookie_path(mut self, cookie_path: impl Into<String>) -> Self {
        self.cookie_path = cookie_path.into();
        self
    }

    pub fn get_cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

/// The persisted form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Milliseconds since the unix epoch.
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub max_inactive_secs: u64,
}

impl SessionData {
    pub fn new(id: impl Into<String>, max_inactive_secs: u64) -> Self {
        let now = now_millis();
        Self { id: id.into(), attributes: HashMap::new(), created_at: now, last_accessed_at: now, max_inactive_secs }
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.max_inactive_secs > 0
            && now_millis.saturating_sub(self.last_accessed_at) > self.max_inactive_secs.saturating_mul(1000)
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_millis() as u64).unwrap_or_default()
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    data: Mutex<SessionData>,
    is_new: bool,
    invalidated: AtomicBool,
}

impl Session {
    fn from_data(data: SessionData, is_new: bool) -> Self {
        Self { inner: Arc::new(SessionInner { data: Mutex::new(data), is_new, invalidated: AtomicBool::new(false) }) }
    }

    fn create(max_inactive_secs: u64) -> Self {
        Self::from_data(SessionData::new(uuid::Uuid::new_v4().to_string(), max_inactive_secs), true)
    }

    fn data(&self) -> MutexGuard<'_, SessionData> {
        self.inner.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> String {
        self.data().id.clone()
    }

    /// Whether the session was created by the current request.
    pub fn is_new(&self) -> bool {
        self.inner.is_new
    }

    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.data().created_at)
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.data().attributes.get(key).cloned()
    }

    /// Returns the attribute deserialized as `T`, `None` if absent or of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key).and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn set<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        self.data().attributes.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data().attributes.remove(key)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.data().attributes.keys().cloned().collect()
    }

    /// Discards the session; it is removed from the store once the response is produced.
    pub fn invalidate(&self) {
        self.inner.invalidated.store(true, Ordering::Release);
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::Acquire)
    }

    fn touched_snapshot(&self) -> SessionData {
        let mut data = self.data();
        data.last_accessed_at = now_millis();
        data.clone()
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("is_new", &self.is_new())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

#[async_trait]
impl FromRequest for Session {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        req.session().await
    }
}

/// Keyed persistence of sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a live session, `None` if it does not exist or has expired.
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError>;

    async fn save(&self, data: &SessionData) -> Result<(), SessionError>;

    async fn remove(&self, id: &str) -> Result<(), SessionError>;
}

/// Stores every session as a JSON file named after its id.
///
/// Operations on the same id are serialized; files are written under a temporary name and
/// renamed into place. A per-id lock lives only while an operation on that id is pending.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), locks: DashMap::new() }
    }

    fn path(&self, id: &str) -> Result<PathBuf, SessionError> {
        let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(SessionError::InvalidId { id: id.to_string() });
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn lock(&self, id: &str) -> IdLock<'_> {
        let mut entry = IdLock { locks: &self.locks, id: id.to_string(), guard: None };
        let lock = Arc::clone(&self.locks.entry(id.to_string()).or_default());
        entry.guard = Some(lock.lock_owned().await);
        entry
    }
}

/// Holds the lock of one session id and drops the table entry once nobody else waits on it.
struct IdLock<'s> {
    locks: &'s DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the table's own reference is the last one left
        self.locks.remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        let path = self.path(id)?;
        let _lock = self.lock(id).await;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = serde_json::from_slice::<SessionData>(&bytes)?;

        if data.is_expired(now_millis()) {
            debug!(id = %id, "remove expired session");
            remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(data))
    }

    async fn save(&self, data: &SessionData) -> Result<(), SessionError> {
        let path = self.path(&data.id)?;
        let _lock = self.lock(&data.id).await;

        tokio::fs::create_dir_all(&self.dir).await?;
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, serde_json::to_vec(data)?).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SessionError> {
        let path = self.path(id)?;
        let _lock = self.lock(id).await;
        remove_file(&path).await
    }
}

async fn remove_file(path: &std::path::Path) -> Result<(), SessionError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The per-request, lazily resolved session. Internal forwards share the same slot.
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Option<Arc<SlotInner>>,
}

struct SlotInner {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    requested_id: Option<String>,
    state: tokio::sync::Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    loaded: bool,
    session: Option<Session>,
    discarded: Vec<Session>,
}

impl SessionSlot {
    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn new(store: Arc<dyn SessionStore>, config: SessionConfig, headers: &HeaderMap) -> Self {
        let requested_id = cookie_value(headers, &config.cookie_name).map(str::to_string);
        let state = tokio::sync::Mutex::new(SlotState::default());
        Self { inner: Some(Arc::new(SlotInner { store, config, requested_id, state })) }
    }

    pub(crate) async fn get(&self) -> Result<Option<Session>, DispatchError> {
        let Some(inner) = &self.inner else {
            return Ok(None);
        };
        let mut state = inner.state.lock().await;
        inner.load(&mut state).await;
        Ok(state.session.clone().filter(|session| !session.is_invalidated()))
    }

    pub(crate) async fn get_or_create(&self) -> Result<Session, DispatchError> {
        let Some(inner) = &self.inner else {
            return Err(DispatchError::server_internal("no session store configured"));
        };
        let mut state = inner.state.lock().await;
        inner.load(&mut state).await;

        if let Some(session) = &state.session
            && !session.is_invalidated()
        {
            return Ok(session.clone());
        }

        let session = Session::create(inner.config.max_inactive_secs);
        debug!(id = %session.id(), "create session");
        if let Some(previous) = state.session.replace(session.clone()) {
            state.discarded.push(previous);
        }
        Ok(session)
    }

    /// Writes back the touched session and emits the matching cookie headers.
    ///
    /// Store failures are logged, they never change the response.
    pub(crate) async fn persist(&self, headers: &mut HeaderMap) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut state = inner.state.lock().await;
        let discarded = std::mem::take(&mut state.discarded);
        let current = state.session.take();

        let mut expire_cookie = false;
        for session in discarded.iter().chain(current.iter().filter(|session| session.is_invalidated())) {
            let id = session.id();
            if let Err(e) = inner.store.remove(&id).await {
                warn!(id = %id, cause = %e, "failed to remove invalidated session");
            }
            expire_cookie |= !session.is_new();
        }

        match current.filter(|session| !session.is_invalidated()) {
            Some(session) => {
                let data = session.touched_snapshot();
                if let Err(e) = inner.store.save(&data).await {
                    warn!(id = %data.id, cause = %e, "failed to save session");
                }
                if session.is_new() {
                    inner.set_cookie(headers, &format!("{}={}; Path={}; HttpOnly", inner.config.cookie_name, data.id, inner.config.cookie_path));
                }
            }
            None if expire_cookie => {
                let expired = format!(
                    "{}=; Path={}; Max-Age=0; Expires={}; HttpOnly",
                    inner.config.cookie_name,
                    inner.config.cookie_path,
                    fmt_http_date(UNIX_EPOCH)
                );
                inner.set_cookie(headers, &expired);
            }
            None => {}
        }
    }
}

impl SlotInner {
    async fn load(&self, state: &mut SlotState) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        let Some(id) = &self.requested_id else {
            return;
        };
        match self.store.load(id).await {
            Ok(Some(data)) => state.session = Some(Session::from_data(data, false)),
            Ok(None) => debug!(id = %id, "requested session does not exist"),
            Err(e) => warn!(id = %id, cause = %e, "failed to load session"),
        }
    }

    fn set_cookie(&self, headers: &mut HeaderMap, cookie: &str) {
        match HeaderValue::try_from(cookie) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(e) => warn!(cause = %e, "invalid session cookie"),
        }
    }
}

impl Debug for SessionSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_struct("SessionSlot").field("requested_id", &inner.requested_id).finish(),
            None => f.write_str("SessionSlot(disabled)"),
        }
    }
}

fn cookie_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
