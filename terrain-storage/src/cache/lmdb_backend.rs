//! LMDB-backed TTL cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! cache that survives process restarts and can be shared by every worker on
//! a host.
//!
//! # Value Format
//!
//! `[expires_at: 8 bytes, little-endian unix millis][payload]`
//!
//! Entries whose `expires_at` has passed read as misses and are removed on
//! the next read. The map has a fixed size, so expired entries are also
//! purged every [`SWEEP_INTERVAL`] writes, and whenever a write finds the map
//! full (the write is then retried once).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use terrain_core::{CacheError, TerrainResult};

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheStats};

const HEADER_LEN: usize = 8;

/// Every this many writes, `set` purges expired entries.
pub const SWEEP_INTERVAL: u64 = 1024;

/// Deletions per write transaction while purging.
const PURGE_BATCH: usize = 32;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to TerrainError.
impl From<LmdbCacheError> for terrain_core::TerrainError {
    fn from(e: LmdbCacheError) -> Self {
        terrain_core::TerrainError::Cache(CacheError::Unavailable {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed cache with per-entry TTL.
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    writes: AtomicU64,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified by anything other than LMDB itself.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    fn encode(value: &[u8], ttl: Duration) -> Vec<u8> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        let mut bytes = Vec::with_capacity(HEADER_LEN + value.len());
        bytes.extend_from_slice(&expires_at.to_le_bytes());
        bytes.extend_from_slice(value);
        bytes
    }

    /// Split a stored value into (expires_at millis, payload).
    fn decode(bytes: &[u8]) -> Result<(i64, &[u8]), LmdbCacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(LmdbCacheError::Corrupt(format!(
                "entry of {} bytes has no header",
                bytes.len()
            )));
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        Ok((i64::from_le_bytes(header), &bytes[HEADER_LEN..]))
    }

    /// Whether a stored value is past its expiry. Corrupt values count as
    /// expired so they get cleared out.
    fn is_expired(bytes: &[u8], now_ms: i64) -> bool {
        Self::decode(bytes)
            .map(|(expires_at, _)| expires_at <= now_ms)
            .unwrap_or(true)
    }

    fn remove_expired(&self, key: &CacheKey) -> Result<(), LmdbCacheError> {
        let removed = self.delete_if_expired(&[key.as_bytes().to_vec()])?;
        self.expirations.fetch_add(removed, Ordering::Relaxed);
        Ok(())
    }

    /// Delete each of `keys` that is still expired, in one write transaction.
    fn delete_if_expired(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let now_ms = Utc::now().timestamp_millis();

        let mut removed = 0u64;
        for key in keys {
            // Re-check under the write transaction: a concurrent set may have refreshed it.
            let still_expired = self
                .db
                .get(&wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
                .is_some_and(|bytes| Self::is_expired(bytes, now_ms));

            if still_expired
                && self
                    .db
                    .delete(&mut wtxn, key)
                    .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                removed += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(removed)
    }

    /// Iterate over every entry and collect the keys that have expired.
    fn collect_expired_keys(&self) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let now_ms = Utc::now().timestamp_millis();

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            if Self::is_expired(value, now_ms) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    /// Delete every expired entry, returning how many were removed.
    ///
    /// Deletes in small transactions so a map that is completely full can
    /// still make progress.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let keys = self.collect_expired_keys()?;

        let mut removed = 0u64;
        for batch in keys.chunks(PURGE_BATCH) {
            removed += self.delete_if_expired(batch)?;
        }

        self.expirations.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> heed::Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key.as_bytes(), bytes)?;
        wtxn.commit()
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &CacheKey) -> TerrainResult<Option<Vec<u8>>> {
        let live = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            match self
                .db
                .get(&rtxn, key.as_bytes())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                None => None,
                Some(bytes) => {
                    let (expires_at, payload) = Self::decode(bytes)?;
                    Some((expires_at > Utc::now().timestamp_millis()).then(|| payload.to_vec()))
                }
            }
        };

        match live {
            Some(Some(payload)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(payload))
            }
            Some(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.remove_expired(key)?;
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> TerrainResult<()> {
        let bytes = Self::encode(value, ttl);

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            match self.purge_expired() {
                Ok(removed) => tracing::trace!(removed, "Swept expired LMDB cache entries"),
                Err(e) => tracing::warn!(error = %e, "LMDB cache sweep failed"),
            }
        }

        match self.put(key, &bytes) {
            Ok(()) => Ok(()),
            Err(heed::Error::Mdb(heed::MdbError::MapFull)) => {
                let removed = self.purge_expired()?;
                tracing::debug!(removed, "LMDB cache map full; purged expired entries");
                self.put(key, &bytes)
                    .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
                Ok(())
            }
            Err(e) => Err(LmdbCacheError::Transaction(e.to_string()).into()),
        }
    }

    async fn delete(&self, key: &CacheKey) -> TerrainResult<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn stats(&self) -> TerrainResult<CacheStats> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let entry_count = self
            .db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrain_core::{EntityIdType, EnvironmentId, OrganizationId, ProjectId};
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (backend, _dir) = create_test_backend();
        let key = CacheKey::environment(OrganizationId::now_v7(), "prod");

        assert_eq!(backend.get(&key).await.unwrap(), None);
        backend
            .set(&key, b"{\"id\":1}", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), Some(b"{\"id\":1}".to_vec()));

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let (backend, _dir) = create_test_backend();
        let key = CacheKey::environment_project(EnvironmentId::now_v7(), ProjectId::now_v7());

        backend
            .set(&key, b"1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(backend.get(&key).await.unwrap(), None);
        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entry_count, 0);
    }

    /// Write already-expired entries straight into the map until it is full.
    fn fill_with_expired(backend: &LmdbCacheBackend) -> usize {
        let expired_at = Utc::now().timestamp_millis() - 1_000;
        let mut value = expired_at.to_le_bytes().to_vec();
        value.extend_from_slice(&[0u8; 200]);

        let org = OrganizationId::now_v7();
        for i in 0.. {
            let key = CacheKey::environment(org, &format!("env-{}", i));
            match backend.put(&key, &value) {
                Ok(()) => {}
                Err(heed::Error::Mdb(heed::MdbError::MapFull)) => return i,
                Err(e) => panic!("unexpected LMDB error: {}", e),
            }
        }
        unreachable!()
    }

    #[tokio::test]
    async fn test_full_map_of_expired_entries_accepts_writes() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LmdbCacheBackend::new(temp_dir.path(), 1).unwrap();
        let filled = fill_with_expired(&backend);
        assert!(filled > 0);

        let org = OrganizationId::now_v7();
        for i in 0..20 {
            let key = CacheKey::environment(org, &format!("fresh-{}", i));
            backend
                .set(&key, &[7u8; 200], Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert!(backend.stats().await.unwrap().expirations > 0);

        for i in 0..20 {
            let key = CacheKey::environment(org, &format!("fresh-{}", i));
            assert_eq!(backend.get(&key).await.unwrap(), Some(vec![7u8; 200]));
        }
        backend.purge_expired().unwrap();
        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.expirations, filled as u64);
        assert_eq!(stats.entry_count, 20);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let (backend, _dir) = create_test_backend();
        let org = OrganizationId::now_v7();
        for i in 0..50 {
            let key = CacheKey::environment(org, &format!("stale-{}", i));
            backend.set(&key, b"v", Duration::from_millis(5)).await.unwrap();
        }
        let live = CacheKey::environment(org, "live");
        backend.set(&live, b"v", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(backend.purge_expired().unwrap(), 50);
        assert_eq!(backend.stats().await.unwrap().entry_count, 1);
        assert_eq!(backend.get(&live).await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_short_lived_writes_never_fill_the_map() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LmdbCacheBackend::new(temp_dir.path(), 1).unwrap();
        let org = OrganizationId::now_v7();

        for i in 0..4_000 {
            let key = CacheKey::environment(org, &format!("env-{}", i));
            backend
                .set(&key, &[1u8; 200], Duration::from_millis(1))
                .await
                .unwrap();
        }

        let stats = backend.stats().await.unwrap();
        assert!(stats.expirations > 0);
        assert!(stats.entry_count < 4_000);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let key = CacheKey::environment(OrganizationId::now_v7(), "staging");
        {
            let backend = LmdbCacheBackend::new(temp_dir.path(), 10).unwrap();
            backend
                .set(&key, b"cached", Duration::from_secs(60))
                .await
                .unwrap();
        }
        let reopened = LmdbCacheBackend::new(temp_dir.path(), 10).unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), Some(b"cached".to_vec()));
    }

    #[tokio::test]
    async fn test_delete() {
        let (backend, _dir) = create_test_backend();
        let key = CacheKey::environment(OrganizationId::now_v7(), "prod");
        backend.set(&key, b"x", Duration::from_secs(60)).await.unwrap();
        backend.delete(&key).await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_short_values() {
        assert!(LmdbCacheBackend::decode(&[1, 2, 3]).is_err());
        let encoded = LmdbCacheBackend::encode(b"abc", Duration::from_secs(1));
        let (_, payload) = LmdbCacheBackend::decode(&encoded).unwrap();
        assert_eq!(payload, b"abc");
    }
}
