//! Cache layer for materialized environments and environment/project links.
//!
//! The cache is an accelerator, never a source of truth: every caller on the
//! materialization path treats a cache error as a miss and falls through to
//! the store.
//!
//! # Tenant Isolation
//!
//! [`CacheKey`] cannot be constructed without an organization id (for
//! environment entries) or an environment and project id (for link markers),
//! so one tenant's entries can never shadow another's.
//!
//! # Backends
//!
//! - [`InMemoryCache`]: process-local, used by default and in tests.
//! - [`LmdbCacheBackend`]: memory-mapped, shared by processes on one host.

pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

use std::sync::Arc;

use terrain_core::{CacheBackendKind, ConfigError, TerrainConfig, TerrainResult};

pub use key::CacheKey;
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCache;
pub use traits::{get_json, set_json, CacheBackend, CacheStats};

/// Build the cache backend selected by configuration.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration does not validate (LMDB
/// selected without a path, for instance), or a cache error if the LMDB
/// environment cannot be opened.
pub fn open_cache_backend(config: &TerrainConfig) -> TerrainResult<Arc<dyn CacheBackend>> {
    config.validate()?;
    match config.cache_backend {
        CacheBackendKind::Memory => Ok(Arc::new(InMemoryCache::new())),
        CacheBackendKind::Lmdb => {
            let path = config
                .lmdb_path
                .as_ref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: "lmdb_path".to_string(),
                })?;
            let backend = LmdbCacheBackend::new(path, config.lmdb_max_size_mb)?;
            tracing::info!(path = %path.display(), "Opened LMDB cache");
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_config_opens_memory_cache() {
        let cache = open_cache_backend(&TerrainConfig::default()).unwrap();
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }

    #[test]
    fn test_lmdb_without_path_is_rejected() {
        let config = TerrainConfig {
            cache_backend: CacheBackendKind::Lmdb,
            lmdb_path: None,
            ..TerrainConfig::default()
        };
        assert!(open_cache_backend(&config).is_err());
    }

    #[test]
    fn test_lmdb_backend_opens() {
        let dir = TempDir::new().unwrap();
        let config = TerrainConfig::default().with_lmdb(dir.path().to_path_buf(), 8);
        assert!(open_cache_backend(&config).is_ok());
    }
}
