//! Shared fixed-window counter and flag store backing the rate limiter.
//!
//! [`CounterStore`] keeps two kinds of entries, both keyed by opaque strings:
//!
//! - **Counters** (`{prefix}:{ip}`): attempt count plus a window expiry. The
//!   count resets once the window lapses; incrementing inside a live window
//!   bumps the count without extending it.
//! - **Flags** (`{prefix}:events:{ip}`): boolean presence with a TTL, used to
//!   suppress duplicate limit-exceeded events.
//!
//! Per-key operations go through the `DashMap` entry API, so concurrent
//! requests from the same IP observe atomic read-modify-write semantics
//! without any in-process locking beyond the map shard.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Counter {
    hits: u64,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct Flag {
    expires_at: Instant,
}

/// Fixed-window counters + TTL flags over concurrent maps.
///
/// Time is read through [`now`][Self::now] so tests can advance a virtual
/// clock instead of sleeping through decay windows.
pub struct CounterStore {
    counters: DashMap<String, Counter>,
    flags: DashMap<String, Flag>,
    #[cfg(test)]
    epoch: Instant,
    /// Test-only virtual clock offset, in milliseconds past `epoch`.
    #[cfg(test)]
    offset_ms: std::sync::atomic::AtomicU64,
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            flags: DashMap::new(),
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

    /// Advance the virtual clock. Counters and flags whose windows have
    /// lapsed become invisible to subsequent reads.
    #[cfg(test)]
    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(
            by.as_millis() as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
    }

    /// Attempts recorded for `key` inside the current window. Zero once the
    /// window has expired — and the stale entry is reclaimed on the spot, so
    /// one-off client IPs do not pin map entries forever.
    pub fn attempts(&self, key: &str) -> u64 {
        let now = self.now();
        if let Some(counter) = self.counters.get(key) {
            if counter.expires_at > now {
                return counter.hits;
            }
        }
        self.counters.remove_if(key, |_, counter| counter.expires_at <= now);
        0
    }

    /// Record one attempt for `key`.
    ///
    /// A fresh or expired entry starts a new window of `decay`; a live entry
    /// is bumped without extending its window. Returns the new count.
    pub fn increment(&self, key: &str, decay: Duration) -> u64 {
        let now = self.now();
        let mut entry = self
            .counters
            .entry(key.to_owned())
            .or_insert_with(|| Counter {
                hits: 0,
                expires_at: now + decay,
            });

        if entry.expires_at <= now {
            entry.hits = 0;
            entry.expires_at = now + decay;
        }
        entry.hits += 1;
        entry.hits
    }

    /// Time until the current window for `key` expires. Zero when no live
    /// window exists.
    pub fn available_in(&self, key: &str) -> Duration {
        let now = self.now();
        match self.counters.get(key) {
            Some(counter) if counter.expires_at > now => counter.expires_at - now,
            _ => Duration::ZERO,
        }
    }

    /// Set a suppression flag with the given TTL, replacing any existing one.
    pub fn put_flag(&self, key: &str, ttl: Duration) {
        let expires_at = self.now() + ttl;
        self.flags.insert(key.to_owned(), Flag { expires_at });
    }

    /// Whether a live suppression flag exists for `key`. Lapsed flags are
    /// reclaimed on read, same as expired counters.
    pub fn has_flag(&self, key: &str) -> bool {
        let now = self.now();
        if let Some(flag) = self.flags.get(key) {
            if flag.expires_at > now {
                return true;
            }
        }
        self.flags.remove_if(key, |_, flag| flag.expires_at <= now);
        false
    }

    /// Drop the suppression flag for `key`, if any.
    pub fn forget_flag(&self, key: &str) {
        self.flags.remove(key);
    }

    #[cfg(test)]
    pub fn counter_entries(&self) -> usize {
        self.counters.len()
    }

    #[cfg(test)]
    pub fn flag_entries(&self) -> usize {
        self.flags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    #[test]
    fn attempts_start_at_zero() {
        let store = CounterStore::new();
        assert_eq!(store.attempts("requests:1.2.3.4"), 0);
    }

    #[test]
    fn increment_counts_within_window() {
        let store = CounterStore::new();
        assert_eq!(store.increment("k", MINUTE), 1);
        assert_eq!(store.increment("k", MINUTE), 2);
        assert_eq!(store.increment("k", MINUTE), 3);
        assert_eq!(store.attempts("k"), 3);
    }

    #[test]
    fn counter_resets_after_window_expires() {
        let store = CounterStore::new();
        store.increment("k", MINUTE);
        store.increment("k", MINUTE);

        store.advance(MINUTE + Duration::from_secs(1));
        assert_eq!(store.attempts("k"), 0);

        // A new increment starts a fresh window at 1.
        assert_eq!(store.increment("k", MINUTE), 1);
    }

    #[test]
    fn increment_does_not_extend_a_live_window() {
        let store = CounterStore::new();
        store.increment("k", MINUTE);

        // 50s in, still the same window.
        store.advance(Duration::from_secs(50));
        store.increment("k", MINUTE);
        assert_eq!(store.attempts("k"), 2);

        // 11s later the original window (60s total) has lapsed, even though
        // the second increment happened 11s ago.
        store.advance(Duration::from_secs(11));
        assert_eq!(store.attempts("k"), 0);
    }

    #[test]
    fn keys_are_independent() {
        let store = CounterStore::new();
        store.increment("requests:1.2.3.4", MINUTE);
        store.increment("requests:1.2.3.4", MINUTE);
        assert_eq!(store.attempts("requests:5.6.7.8"), 0);
        assert_eq!(store.attempts("errors:1.2.3.4"), 0);
    }

    #[test]
    fn available_in_tracks_window_remainder() {
        let store = CounterStore::new();
        store.increment("k", MINUTE);
        store.advance(Duration::from_secs(40));
        assert_eq!(store.available_in("k"), Duration::from_secs(20));

        store.advance(Duration::from_secs(30));
        assert_eq!(store.available_in("k"), Duration::ZERO);
    }

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    #[test]
    fn flag_lives_until_ttl() {
        let store = CounterStore::new();
        store.put_flag("events:1.2.3.4", Duration::from_secs(120));
        assert!(store.has_flag("events:1.2.3.4"));

        store.advance(Duration::from_secs(119));
        assert!(store.has_flag("events:1.2.3.4"));

        store.advance(Duration::from_secs(2));
        assert!(!store.has_flag("events:1.2.3.4"));
    }

    #[test]
    fn forget_clears_flag_immediately() {
        let store = CounterStore::new();
        store.put_flag("f", Duration::from_secs(120));
        store.forget_flag("f");
        assert!(!store.has_flag("f"));
    }

    #[test]
    fn forget_on_missing_flag_is_a_noop() {
        let store = CounterStore::new();
        store.forget_flag("never-set");
        assert!(!store.has_flag("never-set"));
    }

    // -----------------------------------------------------------------------
    // Reclamation
    // -----------------------------------------------------------------------

    #[test]
    fn reading_an_expired_counter_reclaims_its_entry() {
        let store = CounterStore::new();
        store.increment("requests:1.2.3.4", MINUTE);
        store.increment("requests:5.6.7.8", MINUTE);
        assert_eq!(store.counter_entries(), 2);

        store.advance(MINUTE + Duration::from_secs(1));
        assert_eq!(store.attempts("requests:1.2.3.4"), 0);
        assert_eq!(store.counter_entries(), 1, "expired entry must be dropped");

        // The untouched key stays until something reads it.
        assert_eq!(store.attempts("requests:5.6.7.8"), 0);
        assert_eq!(store.counter_entries(), 0);
    }

    #[test]
    fn reading_a_lapsed_flag_reclaims_its_entry() {
        let store = CounterStore::new();
        store.put_flag("events:1.2.3.4", Duration::from_secs(120));
        assert_eq!(store.flag_entries(), 1);

        store.advance(Duration::from_secs(121));
        assert!(!store.has_flag("events:1.2.3.4"));
        assert_eq!(store.flag_entries(), 0, "lapsed flag must be dropped");
    }
}
