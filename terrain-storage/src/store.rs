//! Store traits consumed by the materializer, tombstone recorder and rule
//! creator.
//!
//! Every insert that can race reports a lost race as
//! [`StorageError::UniqueViolation`](terrain_core::StorageError::UniqueViolation);
//! callers decide whether that is recoverable. Unreachable backends report
//! `StorageError::Unavailable` and are never retried here.

use async_trait::async_trait;
use terrain_core::{
    Environment, EnvironmentId, EnvironmentProject, OrganizationId, ProjectId, Rule, RuleId,
    TerrainResult, Tombstone, TombstoneScope, Workflow,
};

/// Environment and environment/project link persistence.
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Insert a new environment. Fails with `UniqueViolation` if a row for
    /// the same (organization, name) already exists.
    async fn environment_insert(&self, env: &Environment) -> TerrainResult<()>;

    /// Find an environment by its natural key.
    async fn environment_find(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> TerrainResult<Option<Environment>>;

    /// Get an environment by id.
    async fn environment_get(&self, id: EnvironmentId) -> TerrainResult<Option<Environment>>;

    /// Insert a link, treating an existing (project, environment) row as
    /// success. Returns whether this call created the row.
    async fn environment_project_insert_ignore_conflict(
        &self,
        link: &EnvironmentProject,
    ) -> TerrainResult<bool>;

    /// List the project links of an environment.
    async fn environment_projects(
        &self,
        environment_id: EnvironmentId,
    ) -> TerrainResult<Vec<EnvironmentProject>>;
}

/// Deletion tombstone persistence.
#[async_trait]
pub trait TombstoneStore: Send + Sync {
    /// Insert a tombstone. Fails with `UniqueViolation` if the same
    /// (scope, table, identifier) was already recorded.
    async fn tombstone_insert(&self, tombstone: &Tombstone) -> TerrainResult<()>;

    /// List tombstones recorded for a scope, oldest first.
    async fn tombstone_list(&self, scope: TombstoneScope) -> TerrainResult<Vec<Tombstone>>;
}

/// Alert rule and migrated workflow persistence.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Persist a rule and, optionally, its migrated workflow in a single
    /// transaction. Either both rows are written or neither is.
    async fn rule_insert(&self, rule: &Rule, workflow: Option<&Workflow>) -> TerrainResult<()>;

    async fn rule_get(&self, id: RuleId) -> TerrainResult<Option<Rule>>;

    async fn rule_list_by_project(&self, project_id: ProjectId) -> TerrainResult<Vec<Rule>>;

    async fn workflow_get_for_rule(&self, rule_id: RuleId) -> TerrainResult<Option<Workflow>>;
}

/// Everything a Terrain deployment needs from its database.
pub trait TerrainStore: EnvironmentStore + TombstoneStore + RuleStore {}

impl<T> TerrainStore for T where T: EnvironmentStore + TombstoneStore + RuleStore {}
