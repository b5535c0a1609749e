//! Configuration types
//!
//! Configuration is loaded from environment variables with defaults that
//! match the production behavior (64-character names, one hour cache TTL,
//! ten second rule-creation locks).

use crate::name::ENVIRONMENT_NAME_MAX_LENGTH;
use crate::{ConfigError, TerrainResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which cache backend to use for materialization caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process-local in-memory cache.
    Memory,
    /// LMDB-backed cache shared by processes on the same host.
    Lmdb,
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainConfig {
    /// Maximum environment name length, in characters.
    pub environment_name_max_length: usize,

    /// TTL for organization+name → environment cache entries.
    pub cache_ttl: Duration,

    /// TTL for environment+project link markers.
    pub link_cache_ttl: Duration,

    /// How long a rule-creation lock is held before it may be displaced.
    pub lock_duration: Duration,

    /// How long to wait for a contended lock. Zero means a single attempt.
    pub lock_acquire_timeout: Duration,

    /// Delay between attempts while waiting for a contended lock.
    pub lock_retry_interval: Duration,

    pub cache_backend: CacheBackendKind,

    /// Directory for the LMDB cache (required when `cache_backend` is `Lmdb`).
    pub lmdb_path: Option<PathBuf>,

    pub lmdb_max_size_mb: usize,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            environment_name_max_length: ENVIRONMENT_NAME_MAX_LENGTH,
            cache_ttl: Duration::from_secs(3600), // 1 hour
            link_cache_ttl: Duration::from_secs(3600),
            lock_duration: Duration::from_secs(10),
            lock_acquire_timeout: Duration::ZERO,
            lock_retry_interval: Duration::from_millis(25),
            cache_backend: CacheBackendKind::Memory,
            lmdb_path: None,
            lmdb_max_size_mb: 64,
        }
    }
}

impl TerrainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create TerrainConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TERRAIN_ENV_NAME_MAX_LENGTH`: Maximum name length (default: 64)
    /// - `TERRAIN_CACHE_TTL_SECS`: Environment cache TTL (default: 3600)
    /// - `TERRAIN_LINK_CACHE_TTL_SECS`: Link cache TTL (default: 3600)
    /// - `TERRAIN_LOCK_DURATION_SECS`: Rule-creation lock duration (default: 10)
    /// - `TERRAIN_LOCK_ACQUIRE_TIMEOUT_MS`: Wait for contended locks (default: 0)
    /// - `TERRAIN_LOCK_RETRY_INTERVAL_MS`: Poll interval while waiting (default: 25)
    /// - `TERRAIN_CACHE_BACKEND`: "memory" or "lmdb" (default: memory)
    /// - `TERRAIN_LMDB_PATH`: LMDB directory
    /// - `TERRAIN_LMDB_MAX_SIZE_MB`: LMDB map size (default: 64)
    pub fn from_env() -> TerrainResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their
    /// defaults; set but unparseable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> TerrainResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let environment_name_max_length = parse_or(
            &lookup,
            "TERRAIN_ENV_NAME_MAX_LENGTH",
            defaults.environment_name_max_length,
        )?;
        let cache_ttl = Duration::from_secs(parse_or(
            &lookup,
            "TERRAIN_CACHE_TTL_SECS",
            defaults.cache_ttl.as_secs(),
        )?);
        let link_cache_ttl = Duration::from_secs(parse_or(
            &lookup,
            "TERRAIN_LINK_CACHE_TTL_SECS",
            defaults.link_cache_ttl.as_secs(),
        )?);
        let lock_duration = Duration::from_secs(parse_or(
            &lookup,
            "TERRAIN_LOCK_DURATION_SECS",
            defaults.lock_duration.as_secs(),
        )?);
        let lock_acquire_timeout = Duration::from_millis(parse_or(
            &lookup,
            "TERRAIN_LOCK_ACQUIRE_TIMEOUT_MS",
            defaults.lock_acquire_timeout.as_millis() as u64,
        )?);
        let lock_retry_interval = Duration::from_millis(parse_or(
            &lookup,
            "TERRAIN_LOCK_RETRY_INTERVAL_MS",
            defaults.lock_retry_interval.as_millis() as u64,
        )?);

        let cache_backend = match lookup("TERRAIN_CACHE_BACKEND") {
            None => defaults.cache_backend,
            Some(value) => match value.trim().to_lowercase().as_str() {
                "memory" => CacheBackendKind::Memory,
                "lmdb" => CacheBackendKind::Lmdb,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "TERRAIN_CACHE_BACKEND".to_string(),
                        value,
                        reason: "expected \"memory\" or \"lmdb\"".to_string(),
                    }
                    .into())
                }
            },
        };

        let lmdb_path = lookup("TERRAIN_LMDB_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let lmdb_max_size_mb =
            parse_or(&lookup, "TERRAIN_LMDB_MAX_SIZE_MB", defaults.lmdb_max_size_mb)?;

        let config = Self {
            environment_name_max_length,
            cache_ttl,
            link_cache_ttl,
            lock_duration,
            lock_acquire_timeout,
            lock_retry_interval,
            cache_backend,
            lmdb_path,
            lmdb_max_size_mb,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> TerrainResult<()> {
        if self.environment_name_max_length == 0 {
            return Err(invalid("environment_name_max_length", "0", "must be positive"));
        }
        if self.cache_ttl.is_zero() {
            return Err(invalid("cache_ttl", "0", "must be positive"));
        }
        if self.link_cache_ttl.is_zero() {
            return Err(invalid("link_cache_ttl", "0", "must be positive"));
        }
        if self.lock_duration.is_zero() {
            return Err(invalid("lock_duration", "0", "must be positive"));
        }
        if self.lock_retry_interval.is_zero() {
            return Err(invalid("lock_retry_interval", "0", "must be positive"));
        }
        if self.cache_backend == CacheBackendKind::Lmdb {
            if self.lmdb_path.is_none() {
                return Err(ConfigError::MissingRequired {
                    field: "lmdb_path".to_string(),
                }
                .into());
            }
            if self.lmdb_max_size_mb == 0 {
                return Err(invalid("lmdb_max_size_mb", "0", "must be positive"));
            }
        }
        Ok(())
    }

    pub fn with_name_max_length(mut self, max: usize) -> Self {
        self.environment_name_max_length = max;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_link_cache_ttl(mut self, ttl: Duration) -> Self {
        self.link_cache_ttl = ttl;
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquire_timeout = timeout;
        self
    }

    pub fn with_lmdb(mut self, path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        self.cache_backend = CacheBackendKind::Lmdb;
        self.lmdb_path = Some(path.into());
        self.lmdb_max_size_mb = max_size_mb;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> TerrainResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            }
            .into()
        }),
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::TerrainError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TerrainError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TerrainConfig::default();
        assert_eq!(config.environment_name_max_length, 64);
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.lock_duration, Duration::from_secs(10));
        assert_eq!(config.cache_backend, CacheBackendKind::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_empty_is_default() {
        let config = TerrainConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, TerrainConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = TerrainConfig::from_lookup(lookup_from(&[
            ("TERRAIN_ENV_NAME_MAX_LENGTH", "128"),
            ("TERRAIN_CACHE_TTL_SECS", "60"),
            ("TERRAIN_LOCK_ACQUIRE_TIMEOUT_MS", "500"),
            ("TERRAIN_CACHE_BACKEND", "LMDB"),
            ("TERRAIN_LMDB_PATH", "/var/cache/terrain"),
        ]))
        .unwrap();
        assert_eq!(config.environment_name_max_length, 128);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.lock_acquire_timeout, Duration::from_millis(500));
        assert_eq!(config.cache_backend, CacheBackendKind::Lmdb);
        assert_eq!(config.lmdb_path, Some(PathBuf::from("/var/cache/terrain")));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = TerrainConfig::from_lookup(lookup_from(&[("TERRAIN_CACHE_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, TerrainError::Config(ConfigError::InvalidValue { .. })));

        let err = TerrainConfig::from_lookup(lookup_from(&[("TERRAIN_CACHE_BACKEND", "redis")]))
            .unwrap_err();
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn test_lmdb_requires_path() {
        let err = TerrainConfig::from_lookup(lookup_from(&[("TERRAIN_CACHE_BACKEND", "lmdb")]))
            .unwrap_err();
        assert!(matches!(
            err,
            TerrainError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = TerrainConfig::default().with_cache_ttl(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
