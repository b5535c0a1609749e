//! Integration tests for environment materialization.
//!
//! Exercises the materializer against the in-memory store and cache the way
//! concurrent request handlers would: many tasks, independent caches, and
//! backends that go away mid-flight.

use std::collections::HashSet;
use std::sync::Arc;

use terrain_core::{EntityType, Environment, TerrainConfig};
use terrain_storage::{EnvironmentStore, InMemoryCache, MockStore};
use terrain_test_utils::assertions::{assert_invalid_name, assert_not_found, assert_unavailable};
use terrain_test_utils::fixtures::{test_organization, test_project, MaterializerHarness};
use terrain_test_utils::init_test_tracing;

// ============================================================================
// GET-OR-CREATE
// ============================================================================

#[tokio::test]
async fn test_repeated_get_or_create_yields_one_row() {
    init_test_tracing();
    let h = MaterializerHarness::new();
    let org = test_organization();
    let project = test_project();

    let first = h.materializer.get_or_create(org, project, Some("production")).await.unwrap();
    let second = h.materializer.get_or_create(org, project, Some("production")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.store.environment_count(), 1);
    assert_eq!(h.store.environment_project_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_row() {
    init_test_tracing();
    let store = Arc::new(MockStore::new());
    let org = test_organization();
    let project = test_project();

    // Each caller gets its own cache so every one of them misses and races
    // on the insert, as separate processes would.
    let mut handles = Vec::new();
    for _ in 0..16 {
        let h = MaterializerHarness::with_store(
            store.clone(),
            Arc::new(InMemoryCache::new()),
            TerrainConfig::default(),
        );
        handles.push(tokio::spawn(async move {
            let env = h
                .materializer
                .get_or_create(org, project, Some("staging"))
                .await?;
            Ok::<_, terrain_core::TerrainError>((env, h.materializer.stats()))
        }));
    }

    let mut ids = HashSet::new();
    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        let (env, stats) = handle.await.unwrap().unwrap();
        ids.insert(env.id);
        created += stats.environments_created;
        conflicts += stats.environment_conflicts;
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(created, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(store.environment_count(), 1);
    assert_eq!(store.environment_project_count(), 1);
}

#[tokio::test]
async fn test_empty_and_absent_names_are_the_same_environment() {
    let h = MaterializerHarness::new();
    let org = test_organization();
    let project = test_project();

    let absent = h.materializer.get_or_create(org, project, None).await.unwrap();
    let empty = h.materializer.get_or_create(org, project, Some("")).await.unwrap();

    assert_eq!(absent.id, empty.id);
    assert_eq!(absent.name, "");
    assert_eq!(h.store.environment_count(), 1);
}

#[tokio::test]
async fn test_names_are_case_sensitive_and_tenant_scoped() {
    let h = MaterializerHarness::new();
    let org = test_organization();
    let project = test_project();

    let lower = h.materializer.get_or_create(org, project, Some("prod")).await.unwrap();
    let upper = h.materializer.get_or_create(org, project, Some("Prod")).await.unwrap();
    let other_org = h
        .materializer
        .get_or_create(test_organization(), project, Some("prod"))
        .await
        .unwrap();

    assert_ne!(lower.id, upper.id);
    assert_ne!(lower.id, other_org.id);
    assert_eq!(h.store.environment_count(), 3);
}

#[tokio::test]
async fn test_invalid_names_never_reach_the_store() {
    let h = MaterializerHarness::new();
    let org = test_organization();
    let project = test_project();

    for bad in ["a\nb", "a\rb", "a\u{0C}b", "a/b"] {
        assert_invalid_name(&h.materializer.get_or_create(org, project, Some(bad)).await);
    }
    let long = "x".repeat(65);
    assert_invalid_name(&h.materializer.get_or_create(org, project, Some(&long)).await);

    assert_eq!(h.store.round_trips(), 0);
    assert_eq!(h.store.environment_count(), 0);
}

#[tokio::test]
async fn test_boundary_names_are_accepted() {
    let h = MaterializerHarness::new();
    let org = test_organization();
    let project = test_project();

    let max = "é".repeat(64);
    let env = h.materializer.get_or_create(org, project, Some(&max)).await.unwrap();
    assert_eq!(env.name.chars().count(), 64);

    let tabbed = h.materializer.get_or_create(org, project, Some("a\tb")).await.unwrap();
    assert_eq!(tabbed.name, "a\tb");
}

// ============================================================================
// CACHING
// ============================================================================

#[tokio::test]
async fn test_warm_cache_makes_no_store_calls() {
    let h = MaterializerHarness::new();
    let org = test_organization();
    let project = test_project();

    h.materializer.get_or_create(org, project, Some("prod")).await.unwrap();
    h.store.reset_round_trips();

    h.materializer.get_or_create(org, project, Some("prod")).await.unwrap();
    assert_eq!(h.store.round_trips(), 0);
}

#[tokio::test]
async fn test_cached_row_created_elsewhere_is_trusted() {
    let h = MaterializerHarness::new();
    let org = test_organization();
    let project = test_project();

    let created = h.materializer.get_or_create(org, project, Some("prod")).await.unwrap();
    h.cache.clear();

    let again = h.materializer.get_or_create(org, project, Some("prod")).await.unwrap();
    assert_eq!(created.id, again.id);
    assert_eq!(h.materializer.stats().environment_conflicts, 1);
}

#[tokio::test]
async fn test_cache_outage_never_fails_the_call() {
    init_test_tracing();
    let h = MaterializerHarness::new();
    h.cache.set_available(false);
    let org = test_organization();
    let project = test_project();

    let first = h.materializer.get_or_create(org, project, Some("prod")).await.unwrap();
    let second = h.materializer.get_or_create(org, project, Some("prod")).await.unwrap();
    let looked_up = h.materializer.lookup(org, Some("prod")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, looked_up.id);
    assert_eq!(h.store.environment_count(), 1);
    assert_eq!(h.store.environment_project_count(), 1);
}

#[tokio::test]
async fn test_store_outage_propagates() {
    let h = MaterializerHarness::new();
    h.store.set_available(false);

    let result = h
        .materializer
        .get_or_create(test_organization(), test_project(), Some("prod"))
        .await;
    assert_unavailable(&result);
}

// ============================================================================
// LINKS
// ============================================================================

#[tokio::test]
async fn test_ensure_link_many_times_creates_one_link() {
    let h = MaterializerHarness::new();
    let env = Environment::new(test_organization(), "prod");
    h.store.environment_insert(&env).await.unwrap();
    let project = test_project();

    for i in 0..10 {
        if i % 3 == 0 {
            h.cache.clear();
        }
        h.materializer.ensure_link(project, &env, Some(false)).await.unwrap();
    }

    assert_eq!(h.store.environment_project_count(), 1);
    let links = h.store.environment_projects(env.id).await.unwrap();
    assert_eq!(links[0].is_hidden, Some(false));
}

#[tokio::test]
async fn test_many_projects_share_one_environment() {
    let h = MaterializerHarness::new();
    let org = test_organization();

    let mut ids = HashSet::new();
    for _ in 0..5 {
        let env = h
            .materializer
            .get_or_create(org, test_project(), Some("prod"))
            .await
            .unwrap();
        ids.insert(env.id);
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(h.store.environment_count(), 1);
    assert_eq!(h.store.environment_project_count(), 5);
}

// ============================================================================
// LOOKUP
// ============================================================================

#[tokio::test]
async fn test_lookup_missing_creates_nothing() {
    let h = MaterializerHarness::new();
    let result = h.materializer.lookup(test_organization(), Some("ghost")).await;

    assert_not_found(&result, EntityType::Environment);
    assert_eq!(h.store.environment_count(), 0);
}

#[tokio::test]
async fn test_lookup_observes_created_id() {
    let h = MaterializerHarness::new();
    let org = test_organization();

    let created = h
        .materializer
        .get_or_create(org, test_project(), Some("qa"))
        .await
        .unwrap();
    let found = h.materializer.lookup(org, Some("qa")).await.unwrap();

    assert_eq!(created.id, found.id);
}
