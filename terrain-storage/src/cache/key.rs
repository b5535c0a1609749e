//! Tenant-scoped cache keys for materialization caches.
//!
//! `CacheKey` has a private constructor set: an environment key cannot be
//! built without an organization id, and a link key cannot be built without
//! both the environment and the project. Names are hashed so arbitrary user
//! input never reaches the backend's key space.

use std::fmt;

use terrain_core::{sha256_hex, EnvironmentId, OrganizationId, ProjectId};

/// Version segment of environment keys. Bump when the cached payload changes shape.
const ENVIRONMENT_KEY_VERSION: u32 = 2;

/// A cache key scoped to an organization (environment keys) or to an
/// environment/project pair (link keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
    rendered: String,
}

/// Private inner enum - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKeyInner {
    Environment {
        organization_id: OrganizationId,
        name_hash: String,
    },
    EnvironmentProject {
        environment_id: EnvironmentId,
        project_id: ProjectId,
    },
}

impl CacheKey {
    /// Key for the organization+name → environment cache.
    ///
    /// Format: `env:2:{organization_id}:{sha256_hex(name)}`
    pub fn environment(organization_id: OrganizationId, name: &str) -> Self {
        let name_hash = sha256_hex(name);
        let rendered = format!(
            "{}{}",
            Self::environment_prefix(organization_id),
            name_hash
        );
        Self {
            inner: CacheKeyInner::Environment {
                organization_id,
                name_hash,
            },
            rendered,
        }
    }

    /// Key for the environment+project "link exists" marker.
    ///
    /// Format: `envproj:c:{environment_id}:{project_id}`
    pub fn environment_project(environment_id: EnvironmentId, project_id: ProjectId) -> Self {
        let rendered = format!("envproj:c:{}:{}", environment_id, project_id);
        Self {
            inner: CacheKeyInner::EnvironmentProject {
                environment_id,
                project_id,
            },
            rendered,
        }
    }

    /// Common prefix of every environment key for one organization.
    pub fn environment_prefix(organization_id: OrganizationId) -> String {
        format!("env:{}:{}:", ENVIRONMENT_KEY_VERSION, organization_id)
    }

    /// Organization this key is scoped to, if it is an environment key.
    pub fn organization_id(&self) -> Option<OrganizationId> {
        match &self.inner {
            CacheKeyInner::Environment {
                organization_id, ..
            } => Some(*organization_id),
            CacheKeyInner::EnvironmentProject { .. } => None,
        }
    }

    /// The rendered key string.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// The rendered key as bytes, for byte-keyed backends.
    pub fn as_bytes(&self) -> &[u8] {
        self.rendered.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use terrain_core::EntityIdType;
    use uuid::Uuid;

    fn org_strategy() -> impl Strategy<Value = OrganizationId> {
        any::<[u8; 16]>().prop_map(|b| OrganizationId::new(Uuid::from_bytes(b)))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: different (organization, name) pairs never share a key.
        #[test]
        fn prop_environment_keys_are_injective(
            org1 in org_strategy(),
            org2 in org_strategy(),
            name1 in "\\PC{0,16}",
            name2 in "\\PC{0,16}",
        ) {
            let key1 = CacheKey::environment(org1, &name1);
            let key2 = CacheKey::environment(org2, &name2);
            if org1 == org2 && name1 == name2 {
                prop_assert_eq!(key1.as_str(), key2.as_str());
            } else {
                prop_assert_ne!(key1.as_str(), key2.as_str());
            }
        }

        /// Property: every environment key starts with its organization prefix.
        #[test]
        fn prop_environment_prefix_is_prefix(org in org_strategy(), name in "\\PC{0,32}") {
            let key = CacheKey::environment(org, &name);
            let prefix = CacheKey::environment_prefix(org);
            prop_assert!(key.as_str().starts_with(&prefix));
        }
    }
}
