//! Process-local TTL cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use terrain_core::{CacheError, TerrainResult};

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheStats};

/// Every this many writes, `set` drops all expired entries.
pub const SWEEP_INTERVAL: u64 = 256;

/// Expiry used for TTLs too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory cache with per-entry TTL.
///
/// Expired entries are dropped when read, and in bulk every
/// [`SWEEP_INTERVAL`] writes. `set_available(false)` makes every call fail,
/// which is how tests exercise the fail-open paths.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache cluster going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> TerrainResult<u64> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(self.sweep(&mut entries, Instant::now()))
    }

    fn sweep(&self, entries: &mut HashMap<String, Entry>, now: Instant) -> u64 {
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = (before - entries.len()) as u64;
        self.expirations.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    fn check_available(&self) -> TerrainResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: "in-memory cache is offline".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn poisoned() -> CacheError {
        CacheError::Unavailable {
            reason: "cache lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> TerrainResult<Option<Vec<u8>>> {
        self.check_available()?;
        let now = Instant::now();

        let found = {
            let entries = self.entries.read().map_err(|_| Self::poisoned())?;
            entries.get(key.as_str()).cloned()
        };

        match found {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value))
            }
            Some(_) => {
                let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
                // Re-check: a concurrent set may have refreshed the entry.
                if entries
                    .get(key.as_str())
                    .is_some_and(|e| e.expires_at <= now)
                {
                    entries.remove(key.as_str());
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> TerrainResult<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            let removed = self.sweep(&mut entries, now);
            tracing::trace!(removed, "Swept expired cache entries");
        }
        entries.insert(
            key.as_str().to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> TerrainResult<()> {
        self.check_available()?;
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(key.as_str());
        Ok(())
    }

    async fn stats(&self) -> TerrainResult<CacheStats> {
        let entry_count = self
            .entries
            .read()
            .map(|e| e.len() as u64)
            .map_err(|_| Self::poisoned())?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}
