//! Conversation cache: TTL-keyed answers for `(history, query)` pairs.
//!
//! Expiry is lazy. An expired entry is removed by the `get` that finds it;
//! there is no background sweep.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use ragchat_core::message::ConversationHistory;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

/// Shortest TTL an entry may have.
pub const MIN_TTL: Duration = Duration::from_secs(60);
/// Longest TTL an entry may have.
pub const MAX_TTL: Duration = Duration::from_secs(86_400);
/// TTL used when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1800);

/// Deterministic key for a question asked after a given history.
///
/// SHA-256 over the history's `role: content` serialization (length
/// prefixed) followed by the sanitized query, hex encoded. Sessions with
/// different histories never share a key for the same question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(history: &ConversationHistory, query: &str) -> Self {
        let serialized = history.serialize();
        let mut hasher = Sha256::new();
        hasher.update(serialized.len().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(serialized.as_bytes());
        hasher.update(b"\nuser: ");
        hasher.update(query.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-wide answer cache, shared by every session.
///
/// One lock guards the whole keyspace; `set` replaces an entry in a single
/// insert so readers never see a partial value.
pub struct ConversationCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    default_ttl: Duration,
}

impl ConversationCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl: clamp_ttl(default_ttl),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached answer, or `None` on a miss. Expired entries are evicted.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut entries = self.entries();
        let entry = entries.get(key)?;

        if Instant::now() > entry.expires_at {
            entries.remove(key);
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        debug!(key = %key, "Cache hit");
        Some(entry.value.clone())
    }

    /// Store `value`, replacing any existing entry.
    ///
    /// `ttl` defaults to the cache's configured TTL and is clamped to
    /// [`MIN_TTL`]..=[`MAX_TTL`].
    pub fn set(&self, key: CacheKey, value: impl Into<String>, ttl: Option<Duration>) {
        let ttl = ttl.map_or(self.default_ttl, clamp_ttl);
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache set");
        self.entries().insert(
            key,
            CacheEntry {
                value: value.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn size(&self) -> usize {
        self.entries().len()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.clamp(MIN_TTL, MAX_TTL)
}
