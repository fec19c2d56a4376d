//! Issued-token registry.
//!
//! The registry is the allow-list consulted before any token is decoded. It
//! stores SHA-256 fingerprints of every token this process has sealed and not
//! yet superseded. A token whose fingerprint is absent was never issued here
//! (or was replaced by a reissue) and is rejected without touching the cipher.
//!
//! # Concurrency
//!
//! One `parking_lot::RwLock` guards the map. `is_trusted` takes the read lock;
//! `register`, `supersede` and `purge_expired` take the write lock, and
//! `supersede` performs its removal and insertion under a single guard.
//!
//! # Eviction
//!
//! With a TTL configured, entries older than the TTL are treated as absent
//! immediately and physically removed by a sweep that runs at most once per
//! sweep interval, piggybacking on writes. Without a TTL entries live as long
//! as the process.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::trace;

/// Size of a fingerprint in bytes
pub const FINGERPRINT_SIZE: usize = 32;

/// Upper bound on the time between two sweeps
const MAX_SWEEP_INTERVAL_MILLIS: i64 = 60_000;

/// One-way digest of a token, used only as a membership key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Fingerprint a token string
    #[must_use]
    pub fn of(token: &str) -> Self {
        Self(Sha256::digest(token.as_bytes()).into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Fingerprint a token string
#[must_use]
pub fn fingerprint(token: &str) -> Fingerprint {
    Fingerprint::of(token)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct Entries {
    /// Fingerprint -> issue time (unix millis)
    issued: HashMap<Fingerprint, i64>,
    next_sweep_millis: i64,
}

/// Concurrent set of fingerprints of currently valid tokens
pub struct IssuedTokenRegistry {
    entries: RwLock<Entries>,
    ttl_millis: Option<i64>,
}

impl IssuedTokenRegistry {
    /// Registry whose entries live until superseded
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    /// Registry whose entries additionally expire after `ttl`
    #[must_use]
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        let ttl_millis = ttl.map(|ttl| i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        Self {
            entries: RwLock::new(Entries {
                issued: HashMap::new(),
                next_sweep_millis: i64::MIN,
            }),
            ttl_millis,
        }
    }

    /// Entry lifetime, if eviction is enabled
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_millis
            .map(|millis| Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }

    /// Record a freshly sealed token. Idempotent.
    pub fn register(&self, token: &str) {
        self.register_at(token, now_millis());
    }

    /// Replace `old` with `new` in one atomic step
    ///
    /// `new` is inserted even if `old` was never present.
    pub fn supersede(&self, old: &str, new: &str) {
        self.supersede_at(old, new, now_millis());
    }

    /// Whether `token` was issued by this registry and is still valid
    #[must_use]
    pub fn is_trusted(&self, token: &str) -> bool {
        self.is_trusted_at(token, now_millis())
    }

    /// Drop every expired entry now, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(now_millis())
    }

    /// Number of stored fingerprints (expired ones included until swept)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().issued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().issued.is_empty()
    }

    fn is_expired(&self, issued_at: i64, now: i64) -> bool {
        self.ttl_millis
            .is_some_and(|ttl| now.saturating_sub(issued_at) > ttl)
    }

    fn register_at(&self, token: &str, now: i64) {
        let fp = Fingerprint::of(token);
        let mut entries = self.entries.write();
        self.maybe_sweep(&mut entries, now);
        entries.issued.insert(fp, now);
        trace!(fingerprint = %fp, "registered token");
    }

    fn supersede_at(&self, old: &str, new: &str, now: i64) {
        let old_fp = Fingerprint::of(old);
        let new_fp = Fingerprint::of(new);
        let mut entries = self.entries.write();
        self.maybe_sweep(&mut entries, now);
        entries.issued.remove(&old_fp);
        entries.issued.insert(new_fp, now);
        trace!(old = %old_fp, new = %new_fp, "superseded token");
    }

    fn is_trusted_at(&self, token: &str, now: i64) -> bool {
        let fp = Fingerprint::of(token);
        self.entries
            .read()
            .issued
            .get(&fp)
            .is_some_and(|&issued_at| !self.is_expired(issued_at, now))
    }

    fn purge_expired_at(&self, now: i64) -> usize {
        let mut entries = self.entries.write();
        self.sweep(&mut entries, now)
    }

    fn maybe_sweep(&self, entries: &mut Entries, now: i64) {
        if now >= entries.next_sweep_millis {
            self.sweep(entries, now);
        }
    }

    fn sweep(&self, entries: &mut Entries, now: i64) -> usize {
        let Some(ttl) = self.ttl_millis else {
            entries.next_sweep_millis = i64::MAX;
            return 0;
        };

        let before = entries.issued.len();
        entries
            .issued
            .retain(|_, issued_at| now.saturating_sub(*issued_at) <= ttl);
        entries.next_sweep_millis = now.saturating_add(ttl.clamp(1, MAX_SWEEP_INTERVAL_MILLIS));

        let evicted = before - entries.issued.len();
        if evicted > 0 {
            trace!(evicted, "swept expired tokens");
        }
        evicted
    }
}

impl Default for IssuedTokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IssuedTokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedTokenRegistry")
            .field("len", &self.len())
            .field("ttl_millis", &self.ttl_millis)
            .finish()
    }
}

// ============================================================
// TESTS
// ============================================================
