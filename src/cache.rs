//! Cache-aside store for serialized decisions.
//!
//! Values are opaque JSON documents; the cache never interprets them. A value
//! that no longer deserializes is reported as a miss.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Time-to-live for cached decisions.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// Expiry horizon used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 86_400);

/// Default namespace for subject keys.
pub const DEFAULT_KEY_PREFIX: &str = "ipcache";

/// Build the cache key for a subject.
pub fn cache_key(prefix: &str, subject: &str) -> String {
    format!("{}:{}", prefix, subject)
}

/// A stored document and its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: String,
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Check if this cache entry has expired.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Thread-safe TTL cache.
pub struct RequestCache {
    cache: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl RequestCache {
    /// Create a new request cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Get a cached document if present, unexpired and parseable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = {
            let cache = self.cache.read().ok()?;
            let entry = cache.get(key)?;
            if entry.is_expired() {
                // Don't remove here to avoid write lock, cleanup will handle it
                return None;
            }
            entry.payload.clone()
        };

        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = key, error = %e, "Discarding unparsable cache entry");
                None
            }
        }
    }

    /// Serialize and store a document for `ttl`.
    pub fn set_with_expiry<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), serde_json::Error> {
        let payload = serde_json::to_string(value)?;
        self.insert_raw(key, payload, ttl);
        Ok(())
    }

    /// Store an already-serialized document verbatim. Last write wins.
    pub fn insert_raw(&self, key: &str, payload: String, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            payload,
            expires_at: now
                .checked_add(ttl)
                .or_else(|| now.checked_add(FAR_FUTURE))
                .unwrap_or(now),
        };

        let Ok(mut cache) = self.cache.write() else {
            debug!(key = key, "Cache lock poisoned, dropping write");
            return;
        };

        // Evict if at capacity
        if cache.len() >= self.max_entries && !cache.contains_key(key) {
            Self::evict_expired_entries(&mut cache);

            // If still at capacity, remove the entry closest to expiry
            if cache.len() >= self.max_entries {
                if let Some(oldest) = cache
                    .iter()
                    .min_by_key(|(_, v)| v.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    cache.remove(&oldest);
                }
            }
        }

        cache.insert(key.to_string(), entry);
    }

    /// Remove expired entries from the cache.
    pub fn cleanup(&self) {
        if let Ok(mut cache) = self.cache.write() {
            Self::evict_expired_entries(&mut cache);
        }
    }

    fn evict_expired_entries(cache: &mut HashMap<String, CacheEntry>) {
        cache.retain(|_, v| !v.is_expired());
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}
