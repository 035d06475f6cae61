//! Session tokens.
//!
//! A session binds an opaque token to a user id. The binding never changes
//! after issue; only the last-seen instant moves so idle sessions can expire.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use zeroize::Zeroizing;

use crate::error::{Result, ShelfError};

/// Random bytes per token.
const TOKEN_BYTES: usize = 32;

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Session storage interface, injected into the service.
pub trait SessionStore: Send + Sync {
    /// Issue a new token for `user_id`.
    fn create(&self, user_id: i64) -> Result<String>;

    /// Look up the user bound to `token`.
    ///
    /// Unknown, malformed and expired tokens all resolve to `None`.
    fn resolve(&self, token: &str) -> Option<i64>;

    /// Drop a session. Unknown tokens are ignored.
    fn destroy(&self, token: &str);

    /// Drop every session.
    fn clear(&self);
}

struct SessionEntry {
    user_id: i64,
    last_seen: Instant,
}

/// In-process session store with an idle timeout.
pub struct MemorySessionStore {
    idle_timeout: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl MemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) sessions.
    pub fn len(&self) -> usize {
        let mut sessions = self.lock();
        self.expire(&mut sessions);
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        // A poisoned map only holds plain ids and instants; keep serving.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expire(&self, sessions: &mut HashMap<String, SessionEntry>) {
        let idle_timeout = self.idle_timeout;
        sessions.retain(|_, entry| entry.last_seen.elapsed() <= idle_timeout);
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, user_id: i64) -> Result<String> {
        let mut bytes = Zeroizing::new([0u8; TOKEN_BYTES]);
        getrandom::getrandom(&mut bytes[..])
            .map_err(|e| ShelfError::Crypto(format!("Failed to generate session token: {}", e)))?;
        let token = URL_SAFE_NO_PAD.encode(&bytes[..]);

        let mut sessions = self.lock();
        self.expire(&mut sessions);
        sessions.insert(
            token.clone(),
            SessionEntry {
                user_id,
                last_seen: Instant::now(),
            },
        );
        Ok(token)
    }

    fn resolve(&self, token: &str) -> Option<i64> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(token)?;
        if entry.last_seen.elapsed() > self.idle_timeout {
            sessions.remove(token);
            return None;
        }
        entry.last_seen = Instant::now();
        Some(entry.user_id)
    }

    fn destroy(&self, token: &str) {
        self.lock().remove(token);
    }

    fn clear(&self) {
        self.lock().clear();
    }
}
