//! Organization feature flags.

use std::collections::{HashMap, HashSet};

use terrain_core::OrganizationId;

/// Rollout flags gating optional behavior per organization.
pub trait FeatureFlags: Send + Sync {
    fn has(&self, feature: &str, organization_id: OrganizationId) -> bool;
}

/// Fixed flag set, enabled globally or per organization.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlags {
    global: HashSet<String>,
    per_organization: HashMap<String, HashSet<OrganizationId>>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable `feature` for every organization.
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.global.insert(feature.into());
        self
    }

    /// Enable `feature` for one organization.
    pub fn with_feature_for(
        mut self,
        feature: impl Into<String>,
        organization_id: OrganizationId,
    ) -> Self {
        self.per_organization
            .entry(feature.into())
            .or_default()
            .insert(organization_id);
        self
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn has(&self, feature: &str, organization_id: OrganizationId) -> bool {
        self.global.contains(feature)
            || self
                .per_organization
                .get(feature)
                .is_some_and(|orgs| orgs.contains(&organization_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrain_core::EntityIdType;

    #[test]
    fn test_global_and_scoped_flags() {
        let enabled = OrganizationId::now_v7();
        let other = OrganizationId::now_v7();
        let flags = StaticFeatureFlags::new()
            .with_feature("organizations:everyone")
            .with_feature_for("organizations:beta", enabled);

        assert!(flags.has("organizations:everyone", other));
        assert!(flags.has("organizations:beta", enabled));
        assert!(!flags.has("organizations:beta", other));
        assert!(!flags.has("organizations:unknown", enabled));
    }
}
