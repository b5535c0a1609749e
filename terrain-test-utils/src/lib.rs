//! Terrain Test Utilities
//!
//! Centralized test infrastructure for the Terrain workspace:
//! - Proptest generators for ids and environment names
//! - Test fixtures wiring a materializer to in-memory backends
//! - Custom assertions for Terrain error variants
//! - Tracing initialisation for tests

use std::sync::{Arc, Once};

// Re-export in-memory backends from their source crate
pub use terrain_storage::{InMemoryCache, InMemoryLockService, MockStore};

// Re-export core types for convenience
pub use terrain_core::{
    EntityIdType, EntityType, Environment, EnvironmentId, OrganizationId, ProjectId,
    StorageError, TerrainConfig, TerrainError, TerrainResult, ValidationError,
};

use terrain_env::EnvironmentMaterializer;
use uuid::Uuid;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG`, once per process.
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        // Another harness may already have installed a global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Terrain ids and names.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID (for generic ID generation).
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_organization_id() -> impl Strategy<Value = OrganizationId> {
        arb_uuid().prop_map(OrganizationId::new)
    }

    pub fn arb_project_id() -> impl Strategy<Value = ProjectId> {
        arb_uuid().prop_map(ProjectId::new)
    }

    /// Names accepted by the default rules: up to 64 characters, none of
    /// them a newline, carriage return, form feed or slash.
    pub fn arb_valid_name() -> impl Strategy<Value = String> {
        proptest::collection::vec(
            any::<char>().prop_filter("forbidden character", |c| {
                !matches!(c, '\n' | '\r' | '\u{0C}' | '/')
            }),
            0..=64,
        )
        .prop_map(|chars| chars.into_iter().collect())
    }

    /// Names containing at least one forbidden character.
    pub fn arb_name_with_forbidden_char() -> impl Strategy<Value = String> {
        (
            "[a-z]{0,20}",
            prop_oneof![Just('\n'), Just('\r'), Just('\u{0C}'), Just('/')],
            "[a-z]{0,20}",
        )
            .prop_map(|(head, bad, tail)| format!("{}{}{}", head, bad, tail))
    }

    /// Names longer than the default limit, built only from allowed characters.
    pub fn arb_overlong_name() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 _-]{65,128}"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired in-memory setups for common scenarios.

    use super::*;

    /// A materializer over fresh in-memory backends, with handles to both so
    /// tests can count round trips or inject outages.
    pub struct MaterializerHarness {
        pub store: Arc<MockStore>,
        pub cache: Arc<InMemoryCache>,
        pub materializer: Arc<EnvironmentMaterializer>,
    }

    impl MaterializerHarness {
        pub fn new() -> Self {
            Self::with_config(TerrainConfig::default())
        }

        pub fn with_config(config: TerrainConfig) -> Self {
            let store = Arc::new(MockStore::new());
            let cache = Arc::new(InMemoryCache::new());
            Self::with_store(store, cache, config)
        }

        /// Share an existing store, e.g. to model several processes that
        /// each hold their own cache.
        pub fn with_store(
            store: Arc<MockStore>,
            cache: Arc<InMemoryCache>,
            config: TerrainConfig,
        ) -> Self {
            let materializer = Arc::new(EnvironmentMaterializer::new(
                store.clone(),
                cache.clone(),
                config,
            ));
            Self {
                store,
                cache,
                materializer,
            }
        }
    }

    impl Default for MaterializerHarness {
        fn default() -> Self {
            Self::new()
        }
    }

    pub fn test_organization() -> OrganizationId {
        OrganizationId::now_v7()
    }

    pub fn test_project() -> ProjectId {
        ProjectId::now_v7()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for Terrain error variants.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TerrainResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a TerrainResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(
        result: &TerrainResult<T>,
        entity_type: EntityType,
    ) {
        match result {
            Err(TerrainError::Storage(StorageError::NotFound { entity_type: et, .. })) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &TerrainResult<T>) {
        match result {
            Err(TerrainError::Storage(StorageError::Unavailable { .. })) => {}
            other => panic!("Expected Unavailable storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_name<T: std::fmt::Debug>(result: &TerrainResult<T>) {
        match result {
            Err(TerrainError::Validation(ValidationError::InvalidEnvironmentName { .. })) => {}
            other => panic!("Expected InvalidEnvironmentName error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
