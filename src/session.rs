//! Cookie-backed in-memory session store.
//!
//! Sessions exist to make the trace id stable across requests from the same
//! client: the first request mints a session (and its trace id), sets the
//! `tg_session` cookie, and every later request with that cookie reuses the
//! same trace id. Nothing else is kept per session, and nothing survives a
//! process restart.
//!
//! The store is bounded two ways, so clients that never replay cookies
//! (crawlers, curl, most API clients) cannot grow it without limit:
//!
//! - every session carries a sliding TTL, refreshed on use; expired entries
//!   are treated as unknown and swept out when the store is near capacity,
//! - at the capacity ceiling a new session is still issued (the response gets
//!   a cookie and a trace id) but not retained, so it lasts one request.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "tg_session";

/// Sliding idle lifetime of a session.
const SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Session {
    /// Stable for the life of the session; minted on first request.
    pub trace_id: Uuid,
}

#[derive(Debug, Clone)]
struct Entry {
    session: Session,
    expires_at: Instant,
}

/// Concurrent, bounded map of session id → session data.
pub struct SessionStore {
    sessions: DashMap<Uuid, Entry>,
    capacity: usize,
    #[cfg(test)]
    epoch: Instant,
    /// Test-only virtual clock offset, in milliseconds past `epoch`.
    #[cfg(test)]
    offset_ms: std::sync::atomic::AtomicU64,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity,
            #[cfg(test)]
            epoch: Instant::now(),
            #[cfg(test)]
            offset_ms: std::sync::atomic::AtomicU64::new(0),
        }
    }

    #[cfg(not(test))]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[cfg(test)]
    fn now(&self) -> Instant {
        self.epoch
            + Duration::from_millis(self.offset_ms.load(std::sync::atomic::Ordering::Relaxed))
    }

    /// Advance the virtual clock. Sessions whose TTL has lapsed become
    /// invisible to subsequent resolves.
    #[cfg(test)]
    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(
            by.as_millis() as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
    }

    /// Resolve the session for a raw `Cookie` header value, creating one when
    /// the header is absent, unparseable, or references an unknown or expired
    /// session.
    ///
    /// Returns the session id, its data, and whether it was freshly created
    /// (in which case the caller must set the cookie on the response).
    pub fn resolve(&self, cookie_header: Option<&str>) -> (Uuid, Session, bool) {
        let now = self.now();

        if let Some(id) = cookie_header.and_then(Self::parse_cookie) {
            if let Some(mut entry) = self.sessions.get_mut(&id) {
                if entry.expires_at > now {
                    entry.expires_at = now + SESSION_TTL;
                    return (id, entry.session.clone(), false);
                }
            }
        }

        let id = Uuid::new_v4();
        let session = Session {
            trace_id: Uuid::new_v4(),
        };
        if self.sessions.len() >= self.capacity {
            self.sweep_expired(now);
        }
        if self.sessions.len() < self.capacity {
            self.sessions.insert(
                id,
                Entry {
                    session: session.clone(),
                    expires_at: now + SESSION_TTL,
                },
            );
        }
        (id, session, true)
    }

    /// Drop every entry whose TTL has lapsed. Called when the store is full,
    /// so the cost is paid only under pressure.
    fn sweep_expired(&self, now: Instant) {
        self.sessions.retain(|_, entry| entry.expires_at > now);
    }

    /// Extract the session id from a `Cookie` header value.
    fn parse_cookie(header: &str) -> Option<Uuid> {
        header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == SESSION_COOKIE).then_some(value)
            })
            .find_map(|value| Uuid::parse_str(value).ok())
    }

    /// `Set-Cookie` value establishing the session on the client.
    pub fn cookie_value(id: Uuid) -> String {
        format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
