//! Terrain Storage - Store Traits, Caches and Locks
//!
//! Defines the persistence seams used by materialization:
//!
//! - [`EnvironmentStore`], [`TombstoneStore`], [`RuleStore`]: the relational
//!   store, with [`MockStore`] for tests and `PgStore` behind the `postgres`
//!   feature.
//! - [`CacheBackend`]: TTL caches keyed by tenant-scoped [`CacheKey`]s.
//! - [`LockService`]: named, expiring locks released on guard drop.

pub mod cache;
pub mod locks;
pub mod mock;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use cache::{
    get_json, open_cache_backend, set_json, CacheBackend, CacheKey, CacheStats, InMemoryCache,
    LmdbCacheBackend, LmdbCacheError,
};
pub use locks::{InMemoryLockService, LockGuard, LockHandle, LockService};
pub use mock::MockStore;
#[cfg(feature = "postgres")]
pub use postgres::{PgConfig, PgStore, SCHEMA_SQL};
pub use store::{EnvironmentStore, RuleStore, TerrainStore, TombstoneStore};
