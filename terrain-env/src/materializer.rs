//! Environment materialization.
//!
//! [`EnvironmentMaterializer::get_or_create`] turns an (organization, name)
//! pair into a durable environment row, creating it at most once no matter
//! how many callers race. Correctness rests on the store's uniqueness
//! constraint; the two caches only save round trips.
//!
//! ```text
//! name ─ validate ─→ env cache ──hit──────────────────────┐
//!                       │miss                             │
//!                       ↓                                 ↓
//!                 insert ─conflict→ re-read ─→ set cache ─→ ensure_link ─→ Environment
//!                                                            │
//!                                      link cache ─hit→ done │
//!                                         │miss              │
//!                                   insert-ignore-conflict ─→ set link cache
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use terrain_core::{
    is_valid_name, name_from_path_segment, name_or_default, validate_name, EntityType,
    Environment, EnvironmentProject, OrganizationId, ProjectId, StorageError, TerrainConfig,
    TerrainResult,
};
use terrain_storage::{get_json, set_json, CacheBackend, CacheKey, EnvironmentStore};

/// Marker stored under link keys. Only presence matters.
const LINK_MARKER: &[u8] = b"1";

// ============================================================================
// STATISTICS
// ============================================================================

/// Point-in-time snapshot of materializer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializerStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Environment rows inserted by this materializer.
    pub environments_created: u64,
    /// Inserts that lost the race and re-read the winner's row.
    pub environment_conflicts: u64,
    pub links_created: u64,
    /// Link inserts that found the link already present.
    pub link_conflicts: u64,
    /// Cache reads or writes that failed and were ignored.
    pub cache_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    environments_created: AtomicU64,
    environment_conflicts: AtomicU64,
    links_created: AtomicU64,
    link_conflicts: AtomicU64,
    cache_failures: AtomicU64,
}

impl Counters {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MaterializerStats {
        MaterializerStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            environments_created: self.environments_created.load(Ordering::Relaxed),
            environment_conflicts: self.environment_conflicts.load(Ordering::Relaxed),
            links_created: self.links_created.load(Ordering::Relaxed),
            link_conflicts: self.link_conflicts.load(Ordering::Relaxed),
            cache_failures: self.cache_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// MATERIALIZER
// ============================================================================

/// Get-or-create for environments, with an environment cache and a link cache.
///
/// Cheap to share: wrap in an `Arc` and call from any number of tasks.
pub struct EnvironmentMaterializer {
    store: Arc<dyn EnvironmentStore>,
    cache: Arc<dyn CacheBackend>,
    config: TerrainConfig,
    counters: Counters,
}

impl EnvironmentMaterializer {
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        cache: Arc<dyn CacheBackend>,
        config: TerrainConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Whether `name` is acceptable as an environment name under the
    /// configured length limit.
    pub fn is_valid_name(&self, name: &str) -> bool {
        is_valid_name(name, self.config.environment_name_max_length)
    }

    /// Decode an environment name taken from a URL path segment.
    pub fn name_from_path_segment(segment: &str) -> TerrainResult<String> {
        name_from_path_segment(segment)
    }

    pub fn stats(&self) -> MaterializerStats {
        self.counters.snapshot()
    }

    /// Return the environment named `raw_name` in `organization_id`, creating
    /// it if needed, and make sure `project_id` is linked to it.
    ///
    /// An absent or empty name selects the default (empty-named) environment.
    ///
    /// # Errors
    ///
    /// - `ValidationError::InvalidEnvironmentName` before any store or cache
    ///   access when the name is rejected.
    /// - `StorageError::Unavailable` (or other store errors) are propagated
    ///   without retry. A lost insert race is not an error.
    #[tracing::instrument(
        skip_all,
        fields(organization_id = %organization_id, project_id = %project_id)
    )]
    pub async fn get_or_create(
        &self,
        organization_id: OrganizationId,
        project_id: ProjectId,
        raw_name: Option<&str>,
    ) -> TerrainResult<Environment> {
        let name = name_or_default(raw_name);
        validate_name(name, self.config.environment_name_max_length)?;

        let key = CacheKey::environment(organization_id, name);
        let env = match self.cache_get_environment(&key).await {
            Some(env) => env,
            None => {
                let env = self.create_or_fetch(organization_id, name).await?;
                self.cache_set_environment(&key, &env).await;
                env
            }
        };

        self.ensure_link(project_id, &env, None).await?;
        Ok(env)
    }

    /// Link `project_id` to `environment` if it is not linked already.
    ///
    /// Idempotent. `is_hidden` only applies when this call creates the link.
    #[tracing::instrument(
        skip_all,
        fields(project_id = %project_id, environment_id = %environment.id)
    )]
    pub async fn ensure_link(
        &self,
        project_id: ProjectId,
        environment: &Environment,
        is_hidden: Option<bool>,
    ) -> TerrainResult<()> {
        let key = CacheKey::environment_project(environment.id, project_id);

        match self.cache.get(&key).await {
            Ok(Some(_)) => {
                tracing::debug!(cache_hit = true, "Environment link cached");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => self.cache_failed("read", &key, &e),
        }

        let link = EnvironmentProject::new(project_id, environment.id).with_hidden(is_hidden);
        match self
            .store
            .environment_project_insert_ignore_conflict(&link)
            .await
        {
            Ok(true) => {
                Counters::incr(&self.counters.links_created);
                tracing::debug!(cache_hit = false, "Created environment link");
            }
            Ok(false) => Counters::incr(&self.counters.link_conflicts),
            Err(e) if e.is_unique_violation() => Counters::incr(&self.counters.link_conflicts),
            Err(e) => return Err(e),
        }

        if let Err(e) = self
            .cache
            .set(&key, LINK_MARKER, self.config.link_cache_ttl)
            .await
        {
            self.cache_failed("write", &key, &e);
        }
        Ok(())
    }

    /// Read-only resolution of an existing environment.
    ///
    /// # Errors
    ///
    /// `StorageError::NotFound` when no such environment exists. Never creates
    /// a row.
    #[tracing::instrument(skip_all, fields(organization_id = %organization_id))]
    pub async fn lookup(
        &self,
        organization_id: OrganizationId,
        raw_name: Option<&str>,
    ) -> TerrainResult<Environment> {
        let name = name_or_default(raw_name);
        validate_name(name, self.config.environment_name_max_length)?;

        let key = CacheKey::environment(organization_id, name);
        if let Some(env) = self.cache_get_environment(&key).await {
            return Ok(env);
        }

        let env = self
            .store
            .environment_find(organization_id, name)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity_type: EntityType::Environment,
                key: format!("{}/{:?}", organization_id, name),
            })?;
        self.cache_set_environment(&key, &env).await;
        Ok(env)
    }

    /// Insert the row, or read the winner's row if another caller got there first.
    async fn create_or_fetch(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> TerrainResult<Environment> {
        let candidate = Environment::new(organization_id, name);
        match self.store.environment_insert(&candidate).await {
            Ok(()) => {
                Counters::incr(&self.counters.environments_created);
                tracing::info!(environment_id = %candidate.id, "Created environment");
                Ok(candidate)
            }
            Err(e) if e.is_unique_violation() => {
                Counters::incr(&self.counters.environment_conflicts);
                tracing::debug!("Environment insert lost race; reading existing row");
                self.store
                    .environment_find(organization_id, name)
                    .await?
                    .ok_or_else(|| {
                        // Violation reported but the row is gone: only possible if
                        // something outside this component deleted it.
                        StorageError::NotFound {
                            entity_type: EntityType::Environment,
                            key: format!("{}/{:?}", organization_id, name),
                        }
                        .into()
                    })
            }
            Err(e) => Err(e),
        }
    }

    async fn cache_get_environment(&self, key: &CacheKey) -> Option<Environment> {
        match get_json::<Environment>(self.cache.as_ref(), key).await {
            Ok(Some(env)) => {
                Counters::incr(&self.counters.cache_hits);
                tracing::debug!(cache_hit = true, environment_id = %env.id, "Environment cached");
                Some(env)
            }
            Ok(None) => {
                Counters::incr(&self.counters.cache_misses);
                None
            }
            Err(e) => {
                Counters::incr(&self.counters.cache_misses);
                self.cache_failed("read", key, &e);
                None
            }
        }
    }

    async fn cache_set_environment(&self, key: &CacheKey, env: &Environment) {
        if let Err(e) = set_json(self.cache.as_ref(), key, env, self.config.cache_ttl).await {
            self.cache_failed("write", key, &e);
        }
    }

    fn cache_failed(&self, op: &'static str, key: &CacheKey, error: &terrain_core::TerrainError) {
        Counters::incr(&self.counters.cache_failures);
        tracing::warn!(error = %error, key = %key, op, "Cache unavailable; continuing without it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrain_core::{EntityIdType, TerrainError, ValidationError};
    use terrain_storage::{InMemoryCache, MockStore};

    fn setup() -> (Arc<MockStore>, Arc<InMemoryCache>, EnvironmentMaterializer) {
        let store = Arc::new(MockStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let materializer =
            EnvironmentMaterializer::new(store.clone(), cache.clone(), TerrainConfig::default());
        (store, cache, materializer)
    }

    #[tokio::test]
    async fn test_get_or_create_creates_once() {
        let (store, _cache, m) = setup();
        let org = OrganizationId::now_v7();
        let project = ProjectId::now_v7();

        let first = m.get_or_create(org, project, Some("prod")).await.unwrap();
        let second = m.get_or_create(org, project, Some("prod")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "prod");
        assert_eq!(store.environment_count(), 1);
        assert_eq!(store.environment_project_count(), 1);

        let stats = m.stats();
        assert_eq!(stats.environments_created, 1);
        assert_eq!(stats.links_created, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_invalid_name_touches_nothing() {
        let (store, _cache, m) = setup();
        let err = m
            .get_or_create(OrganizationId::now_v7(), ProjectId::now_v7(), Some("a/b"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TerrainError::Validation(ValidationError::InvalidEnvironmentName { .. })
        ));
        assert_eq!(store.round_trips(), 0);
        assert_eq!(m.stats(), MaterializerStats::default());
    }

    #[tokio::test]
    async fn test_lost_race_reads_existing_row() {
        let (store, _cache, m) = setup();
        let org = OrganizationId::now_v7();
        // Row created behind the cache's back, as by another process.
        let existing = Environment::new(org, "prod");
        store.environment_insert(&existing).await.unwrap();

        let env = m.get_or_create(org, ProjectId::now_v7(), Some("prod")).await.unwrap();
        assert_eq!(env.id, existing.id);
        assert_eq!(m.stats().environment_conflicts, 1);
        assert_eq!(store.environment_count(), 1);
    }

    #[tokio::test]
    async fn test_link_cache_hit_skips_store() {
        let (store, _cache, m) = setup();
        let env = Environment::new(OrganizationId::now_v7(), "prod");
        let project = ProjectId::now_v7();

        m.ensure_link(project, &env, Some(true)).await.unwrap();
        store.reset_round_trips();
        m.ensure_link(project, &env, Some(true)).await.unwrap();

        assert_eq!(store.round_trips(), 0);
        assert_eq!(store.environment_project_count(), 1);
    }

    #[tokio::test]
    async fn test_link_conflict_is_success() {
        let (store, cache, m) = setup();
        let env = Environment::new(OrganizationId::now_v7(), "prod");
        let project = ProjectId::now_v7();

        m.ensure_link(project, &env, None).await.unwrap();
        cache.clear();
        m.ensure_link(project, &env, None).await.unwrap();

        assert_eq!(store.environment_project_count(), 1);
        assert_eq!(m.stats().link_conflicts, 1);
    }

    #[tokio::test]
    async fn test_lookup_missing_is_not_found() {
        let (store, _cache, m) = setup();
        let err = m
            .lookup(OrganizationId::now_v7(), Some("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.environment_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_after_create_sees_same_id() {
        let (_store, cache, m) = setup();
        let org = OrganizationId::now_v7();
        let created = m.get_or_create(org, ProjectId::now_v7(), None).await.unwrap();

        cache.clear();
        let found = m.lookup(org, Some("")).await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.name, "");
    }

    #[tokio::test]
    async fn test_cache_outage_is_survivable() {
        let (store, cache, m) = setup();
        cache.set_available(false);
        let org = OrganizationId::now_v7();
        let project = ProjectId::now_v7();

        let first = m.get_or_create(org, project, Some("prod")).await.unwrap();
        let second = m.get_or_create(org, project, Some("prod")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.environment_count(), 1);
        assert!(m.stats().cache_failures > 0);
    }

    #[test]
    fn test_is_valid_name_uses_configured_limit() {
        let store = Arc::new(MockStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let m = EnvironmentMaterializer::new(
            store,
            cache,
            TerrainConfig::default().with_name_max_length(4),
        );
        assert!(m.is_valid_name("prod"));
        assert!(!m.is_valid_name("production"));
        assert!(m.is_valid_name(""));
    }

    #[test]
    fn test_name_from_path_segment() {
        assert_eq!(EnvironmentMaterializer::name_from_path_segment("none").unwrap(), "");
        assert_eq!(
            EnvironmentMaterializer::name_from_path_segment("prod%20eu").unwrap(),
            "prod eu"
        );
    }
}
