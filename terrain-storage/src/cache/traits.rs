//! Cache backend trait and statistics.
//!
//! Backends store opaque bytes under a [`CacheKey`] with a per-entry TTL.
//! Entries past their TTL must read as misses. The trait is object safe so
//! callers can hold an `Arc<dyn CacheBackend>` chosen at startup.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use terrain_core::{CacheError, TerrainResult};

use super::key::CacheKey;

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations should be thread-safe and support concurrent access.
/// Errors returned here are advisory: callers on the materialization path
/// treat them as misses.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the raw value for a key, or `None` on miss or expiry.
    async fn get(&self, key: &CacheKey) -> TerrainResult<Option<Vec<u8>>>;

    /// Store a raw value with the given TTL, replacing any previous entry.
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> TerrainResult<()>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &CacheKey) -> TerrainResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> TerrainResult<CacheStats>;
}

/// Read a JSON-encoded value.
pub async fn get_json<T>(cache: &dyn CacheBackend, key: &CacheKey) -> TerrainResult<Option<T>>
where
    T: DeserializeOwned,
{
    match cache.get(key).await? {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            CacheError::Deserialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        }),
    }
}

/// Store a value JSON-encoded.
pub async fn set_json<T>(
    cache: &dyn CacheBackend,
    key: &CacheKey,
    value: &T,
    ttl: Duration,
) -> TerrainResult<()>
where
    T: Serialize + Sync,
{
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    cache.set(key, &bytes, ttl).await
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (including expired entries).
    pub misses: u64,
    /// Number of entries currently stored, expired or not.
    pub entry_count: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
